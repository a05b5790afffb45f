//! Storage fault injection.

use parking_lot::Mutex;
use secsync_core::{
    IdentityCertificateChain, Manifest, MembershipCertificateChain, OnlineApplication,
    PermissionPolicy, PersistedApplicationRecord, TransactionId,
};
use secsync_storage::{SecurityStorage, StorageError, StorageResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// A storage operation that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageOp {
    /// `start_updates`
    StartUpdates,
    /// `complete_updates`
    CompleteUpdates,
    /// `get_membership_certificates`
    GetMemberships,
    /// `get_identity_certificates_and_manifest`
    GetIdentity,
    /// `get_policy`
    GetPolicy,
}

/// Wraps a storage and injects failures and concurrent changes.
pub struct FaultyStorage<S> {
    inner: S,
    failures: Mutex<HashMap<StorageOp, StorageError>>,
    unsettled_closes: AtomicU32,
    starts: AtomicU64,
    completes: AtomicU64,
}

impl<S: SecurityStorage> FaultyStorage<S> {
    /// Wraps a storage without injecting anything.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            failures: Mutex::new(HashMap::new()),
            unsettled_closes: AtomicU32::new(0),
            starts: AtomicU64::new(0),
            completes: AtomicU64::new(0),
        }
    }

    /// Returns the wrapped storage.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Makes every later call of `op` fail with `error`.
    pub fn fail_on(&self, op: StorageOp, error: StorageError) {
        self.failures.lock().insert(op, error);
    }

    /// Removes all injected failures.
    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// Makes the next `closes` calls to `complete_updates` report a newer
    /// transaction id, as if the desired state changed during each pass.
    pub fn unsettle(&self, closes: u32) {
        self.unsettled_closes.store(closes, Ordering::SeqCst);
    }

    /// Returns the number of `start_updates` calls.
    pub fn starts(&self) -> u64 {
        self.starts.load(Ordering::SeqCst)
    }

    /// Returns the number of `complete_updates` calls.
    pub fn completes(&self) -> u64 {
        self.completes.load(Ordering::SeqCst)
    }

    fn check(&self, op: StorageOp) -> StorageResult<()> {
        match self.failures.lock().get(&op) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

impl<S: SecurityStorage> SecurityStorage for FaultyStorage<S> {
    fn start_updates(
        &self,
        app: &OnlineApplication,
    ) -> StorageResult<(PersistedApplicationRecord, TransactionId)> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.check(StorageOp::StartUpdates)?;
        self.inner.start_updates(app)
    }

    fn complete_updates(
        &self,
        record: &PersistedApplicationRecord,
        transaction: TransactionId,
    ) -> StorageResult<TransactionId> {
        self.completes.fetch_add(1, Ordering::SeqCst);
        // The inner transaction is always closed so later passes can open it.
        let current = self.inner.complete_updates(record, transaction)?;
        self.check(StorageOp::CompleteUpdates)?;

        let unsettled = self
            .unsettled_closes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if unsettled {
            Ok(TransactionId::new(current.as_u64() + 1))
        } else {
            Ok(current)
        }
    }

    fn get_membership_certificates(
        &self,
        app: &OnlineApplication,
    ) -> StorageResult<Vec<MembershipCertificateChain>> {
        self.check(StorageOp::GetMemberships)?;
        self.inner.get_membership_certificates(app)
    }

    fn get_identity_certificates_and_manifest(
        &self,
        app: &OnlineApplication,
    ) -> StorageResult<(IdentityCertificateChain, Manifest)> {
        self.check(StorageOp::GetIdentity)?;
        self.inner.get_identity_certificates_and_manifest(app)
    }

    fn get_policy(&self, app: &OnlineApplication) -> StorageResult<PermissionPolicy> {
        self.check(StorageOp::GetPolicy)?;
        self.inner.get_policy(app)
    }
}
