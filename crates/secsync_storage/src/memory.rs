//! In-memory security storage for testing.

use crate::backend::{PendingChangesListener, SecurityStorage};
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use secsync_core::{
    CertificateIdentity, IdentityCertificateChain, KeyInfo, Manifest, MembershipCertificateChain,
    OnlineApplication, PermissionPolicy, PersistedApplicationRecord, SyncState, TransactionId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Desired state of one managed application.
#[derive(Debug, Clone)]
struct ManagedApplication {
    record: PersistedApplicationRecord,
    identity: IdentityCertificateChain,
    manifest: Manifest,
    memberships: Vec<MembershipCertificateChain>,
    policy: Option<PermissionPolicy>,
    /// Bumped on every desired-state change; doubles as the transaction id.
    revision: u64,
    /// Revision at which a claim or removal last set the sync state.
    state_revision: u64,
    active: Option<TransactionId>,
}

impl ManagedApplication {
    fn current_transaction(&self) -> TransactionId {
        TransactionId::new(self.revision)
    }
}

/// An in-memory security storage.
///
/// Besides the [`SecurityStorage`] operations used by the sync engine, it
/// offers the mutators a management layer would call (claim, install a
/// membership, update the policy, ...). Every mutator bumps the
/// application's revision and notifies the registered
/// [`PendingChangesListener`].
///
/// # Thread Safety
///
/// This storage is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use secsync_core::{KeyInfo, IdentityCertificateChain, Manifest, PermissionPolicy};
/// use secsync_storage::InMemorySecurityStorage;
///
/// let storage = InMemorySecurityStorage::new();
/// let key = KeyInfo::from_key_id(vec![9]);
/// storage.claim_application(key.clone(), IdentityCertificateChain::default(), Manifest::default());
/// storage.update_policy(&key, PermissionPolicy::new(2)).unwrap();
/// assert_eq!(storage.managed_applications().len(), 1);
/// ```
#[derive(Default)]
pub struct InMemorySecurityStorage {
    applications: RwLock<HashMap<KeyInfo, ManagedApplication>>,
    listener: RwLock<Option<Arc<dyn PendingChangesListener>>>,
    closed: AtomicBool,
}

impl InMemorySecurityStorage {
    /// Creates a new empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the listener notified after every desired-state change.
    pub fn set_listener(&self, listener: Arc<dyn PendingChangesListener>) {
        *self.listener.write() = Some(listener);
    }

    /// Closes the storage. Every later operation fails with `Closed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Starts managing an application with the given identity and manifest.
    ///
    /// Re-claiming a managed application replaces its desired identity and
    /// clears memberships and policy.
    pub fn claim_application(
        &self,
        key_info: KeyInfo,
        identity: IdentityCertificateChain,
        manifest: Manifest,
    ) -> PersistedApplicationRecord {
        let record = {
            let mut apps = self.applications.write();
            let revision = apps.get(&key_info).map_or(1, |app| app.revision + 1);
            let active = apps.get(&key_info).and_then(|app| app.active);
            let managed = ManagedApplication {
                record: PersistedApplicationRecord::new(key_info.clone(), SyncState::Ok),
                identity,
                manifest,
                memberships: Vec::new(),
                policy: None,
                revision,
                state_revision: revision,
                active,
            };
            let record = managed.record.clone();
            apps.insert(key_info, managed);
            record
        };
        debug!(application = %record.key_info, "application claimed");
        self.notify(vec![record.clone()]);
        record
    }

    /// Adds a membership to the desired state.
    ///
    /// A chain with the same leaf identity as an existing one replaces it.
    ///
    /// # Errors
    ///
    /// Returns `EndOfData` if the application is not managed.
    pub fn install_membership(
        &self,
        key_info: &KeyInfo,
        chain: MembershipCertificateChain,
    ) -> StorageResult<()> {
        self.mutate(key_info, |app| {
            let identity = chain.leaf_identity();
            match app
                .memberships
                .iter_mut()
                .find(|existing| identity.is_some() && existing.leaf_identity() == identity)
            {
                Some(existing) => *existing = chain,
                None => app.memberships.push(chain),
            }
        })
    }

    /// Removes the membership whose leaf has the given identity.
    ///
    /// # Errors
    ///
    /// Returns `EndOfData` if the application is not managed.
    pub fn remove_membership(
        &self,
        key_info: &KeyInfo,
        identity: &CertificateIdentity,
    ) -> StorageResult<()> {
        self.mutate(key_info, |app| {
            app.memberships
                .retain(|chain| chain.leaf_identity().as_ref() != Some(identity));
        })
    }

    /// Replaces the desired identity chain and manifest.
    ///
    /// # Errors
    ///
    /// Returns `EndOfData` if the application is not managed.
    pub fn update_identity(
        &self,
        key_info: &KeyInfo,
        identity: IdentityCertificateChain,
        manifest: Manifest,
    ) -> StorageResult<()> {
        self.mutate(key_info, |app| {
            app.identity = identity;
            app.manifest = manifest;
        })
    }

    /// Sets the desired policy.
    ///
    /// # Errors
    ///
    /// Returns `EndOfData` if the application is not managed.
    pub fn update_policy(&self, key_info: &KeyInfo, policy: PermissionPolicy) -> StorageResult<()> {
        self.mutate(key_info, |app| app.policy = Some(policy))
    }

    /// Clears the desired policy, so the application falls back to its default.
    ///
    /// # Errors
    ///
    /// Returns `EndOfData` if the application is not managed.
    pub fn remove_policy(&self, key_info: &KeyInfo) -> StorageResult<()> {
        self.mutate(key_info, |app| app.policy = None)
    }

    /// Requests that the application be reset and forgotten.
    ///
    /// The record is marked `WillReset`; it is dropped once a sync cycle
    /// completes with `Reset`.
    ///
    /// # Errors
    ///
    /// Returns `EndOfData` if the application is not managed.
    pub fn remove_application(&self, key_info: &KeyInfo) -> StorageResult<()> {
        self.mutate(key_info, |app| {
            app.record.sync_state = SyncState::WillReset;
            app.state_revision = app.revision + 1;
        })
    }

    /// Returns the record of a managed application.
    ///
    /// # Errors
    ///
    /// Returns `EndOfData` if the application is not managed.
    pub fn get_managed_application(
        &self,
        key_info: &KeyInfo,
    ) -> StorageResult<PersistedApplicationRecord> {
        self.check_open()?;
        self.applications
            .read()
            .get(key_info)
            .map(|app| app.record.clone())
            .ok_or(StorageError::EndOfData)
    }

    /// Returns the records of all managed applications.
    pub fn managed_applications(&self) -> Vec<PersistedApplicationRecord> {
        self.applications
            .read()
            .values()
            .map(|app| app.record.clone())
            .collect()
    }

    /// Returns true if an update transaction is open for the application.
    pub fn transaction_active(&self, key_info: &KeyInfo) -> bool {
        self.applications
            .read()
            .get(key_info)
            .is_some_and(|app| app.active.is_some())
    }

    fn check_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }

    fn mutate<F>(&self, key_info: &KeyInfo, change: F) -> StorageResult<()>
    where
        F: FnOnce(&mut ManagedApplication),
    {
        self.check_open()?;
        let record = {
            let mut apps = self.applications.write();
            let app = apps.get_mut(key_info).ok_or(StorageError::EndOfData)?;
            change(app);
            app.revision += 1;
            app.record.clone()
        };
        self.notify(vec![record]);
        Ok(())
    }

    fn notify(&self, records: Vec<PersistedApplicationRecord>) {
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            listener.on_pending_changes(records);
        }
    }

    fn read<T, F>(&self, app: &OnlineApplication, get: F) -> StorageResult<T>
    where
        F: FnOnce(&ManagedApplication) -> StorageResult<T>,
    {
        self.check_open()?;
        let apps = self.applications.read();
        let managed = apps.get(&app.key_info).ok_or(StorageError::EndOfData)?;
        get(managed)
    }
}

impl SecurityStorage for InMemorySecurityStorage {
    fn start_updates(
        &self,
        app: &OnlineApplication,
    ) -> StorageResult<(PersistedApplicationRecord, TransactionId)> {
        self.check_open()?;
        let mut apps = self.applications.write();
        let managed = apps.get_mut(&app.key_info).ok_or(StorageError::EndOfData)?;
        if managed.active.is_some() {
            return Err(StorageError::TransactionActive {
                application: app.key_info.to_string(),
            });
        }
        let transaction = managed.current_transaction();
        managed.active = Some(transaction);
        Ok((managed.record.clone(), transaction))
    }

    fn complete_updates(
        &self,
        record: &PersistedApplicationRecord,
        transaction: TransactionId,
    ) -> StorageResult<TransactionId> {
        self.check_open()?;
        let mut apps = self.applications.write();
        let unknown = || StorageError::UnknownTransaction {
            application: record.key_info.to_string(),
        };
        let managed = apps.get_mut(&record.key_info).ok_or_else(unknown)?;
        if managed.active != Some(transaction) {
            return Err(unknown());
        }
        managed.active = None;

        // A claim or removal made while the transaction was open wins over
        // the state the pass reached; the caller restarts on the new id.
        if managed.state_revision > transaction.as_u64() {
            debug!(
                application = %record.key_info,
                kept = %managed.record.sync_state,
                "sync state changed during transaction"
            );
            return Ok(managed.current_transaction());
        }

        managed.record.sync_state = record.sync_state;
        if record.sync_state == SyncState::Reset {
            apps.remove(&record.key_info);
            debug!(application = %record.key_info, "application reset, record removed");
            // Nothing is left to retry.
            return Ok(transaction);
        }
        Ok(managed.current_transaction())
    }

    fn get_membership_certificates(
        &self,
        app: &OnlineApplication,
    ) -> StorageResult<Vec<MembershipCertificateChain>> {
        self.read(app, |managed| Ok(managed.memberships.clone()))
    }

    fn get_identity_certificates_and_manifest(
        &self,
        app: &OnlineApplication,
    ) -> StorageResult<(IdentityCertificateChain, Manifest)> {
        self.read(app, |managed| {
            Ok((managed.identity.clone(), managed.manifest.clone()))
        })
    }

    fn get_policy(&self, app: &OnlineApplication) -> StorageResult<PermissionPolicy> {
        self.read(app, |managed| {
            managed.policy.clone().ok_or(StorageError::EndOfData)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use secsync_core::{ApplicationState, Certificate, CertificateChain};

    fn key(id: u8) -> KeyInfo {
        KeyInfo::from_key_id(vec![id])
    }

    fn app(id: u8) -> OnlineApplication {
        OnlineApplication::new(format!(":1.{id}"), ApplicationState::Claimed, key(id))
    }

    fn membership(serial: u8, aki: u8) -> MembershipCertificateChain {
        CertificateChain::new(vec![Certificate::new(vec![serial], vec![aki])])
    }

    fn claimed(id: u8) -> InMemorySecurityStorage {
        let storage = InMemorySecurityStorage::new();
        storage.claim_application(key(id), IdentityCertificateChain::default(), Manifest::default());
        storage
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<PersistedApplicationRecord>>,
    }

    impl PendingChangesListener for Recorder {
        fn on_pending_changes(&self, records: Vec<PersistedApplicationRecord>) {
            self.seen.lock().extend(records);
        }
    }

    #[test]
    fn unknown_application_is_end_of_data() {
        let storage = InMemorySecurityStorage::new();
        assert_eq!(storage.start_updates(&app(1)).unwrap_err(), StorageError::EndOfData);
        assert_eq!(storage.get_policy(&app(1)).unwrap_err(), StorageError::EndOfData);
    }

    #[test]
    fn transaction_round_trip_returns_same_id() {
        let storage = claimed(1);
        let (record, txn) = storage.start_updates(&app(1)).unwrap();
        assert!(storage.transaction_active(&key(1)));
        assert_eq!(record.sync_state, SyncState::Ok);

        let next = storage.complete_updates(&record, txn).unwrap();
        assert_eq!(next, txn);
        assert!(!storage.transaction_active(&key(1)));
    }

    #[test]
    fn second_transaction_is_rejected() {
        let storage = claimed(1);
        storage.start_updates(&app(1)).unwrap();
        assert!(matches!(
            storage.start_updates(&app(1)),
            Err(StorageError::TransactionActive { .. })
        ));
    }

    #[test]
    fn change_during_transaction_changes_id() {
        let storage = claimed(1);
        let (record, txn) = storage.start_updates(&app(1)).unwrap();

        storage.update_policy(&key(1), PermissionPolicy::new(4)).unwrap();

        let next = storage.complete_updates(&record, txn).unwrap();
        assert_ne!(next, txn);
    }

    #[test]
    fn completing_unknown_transaction_fails() {
        let storage = claimed(1);
        let record = storage.get_managed_application(&key(1)).unwrap();
        assert!(matches!(
            storage.complete_updates(&record, TransactionId::new(99)),
            Err(StorageError::UnknownTransaction { .. })
        ));
    }

    #[test]
    fn reset_record_is_forgotten() {
        let storage = claimed(1);
        storage.remove_application(&key(1)).unwrap();
        assert_eq!(
            storage.get_managed_application(&key(1)).unwrap().sync_state,
            SyncState::WillReset
        );

        let (mut record, txn) = storage.start_updates(&app(1)).unwrap();
        assert_eq!(record.sync_state, SyncState::WillReset);
        record.sync_state = SyncState::Reset;
        storage.complete_updates(&record, txn).unwrap();

        assert_eq!(
            storage.get_managed_application(&key(1)).unwrap_err(),
            StorageError::EndOfData
        );
    }

    #[test]
    fn removal_during_update_survives_close() {
        let storage = claimed(1);
        let (mut record, txn) = storage.start_updates(&app(1)).unwrap();
        storage.remove_application(&key(1)).unwrap();

        record.sync_state = SyncState::Ok;
        let next = storage.complete_updates(&record, txn).unwrap();
        assert_ne!(next, txn);
        assert_eq!(
            storage.get_managed_application(&key(1)).unwrap().sync_state,
            SyncState::WillReset
        );

        let (record, _) = storage.start_updates(&app(1)).unwrap();
        assert_eq!(record.sync_state, SyncState::WillReset);
    }

    #[test]
    fn claim_during_reset_survives_close() {
        let storage = claimed(1);
        storage.remove_application(&key(1)).unwrap();
        let (mut record, txn) = storage.start_updates(&app(1)).unwrap();
        storage.claim_application(key(1), IdentityCertificateChain::default(), Manifest::default());

        record.sync_state = SyncState::Reset;
        let next = storage.complete_updates(&record, txn).unwrap();
        assert_ne!(next, txn);
        let kept = storage.get_managed_application(&key(1)).unwrap();
        assert_eq!(kept.sync_state, SyncState::Ok);
        assert!(!storage.transaction_active(&key(1)));
    }

    #[test]
    fn content_change_during_reset_still_forgets() {
        let storage = claimed(1);
        storage.remove_application(&key(1)).unwrap();
        let (mut record, txn) = storage.start_updates(&app(1)).unwrap();
        storage.update_policy(&key(1), PermissionPolicy::new(3)).unwrap();

        record.sync_state = SyncState::Reset;
        assert_eq!(storage.complete_updates(&record, txn).unwrap(), txn);
        assert_eq!(
            storage.get_managed_application(&key(1)).unwrap_err(),
            StorageError::EndOfData
        );
    }

    #[test]
    fn memberships_install_replace_remove() {
        let storage = claimed(1);
        storage.install_membership(&key(1), membership(1, 10)).unwrap();
        storage.install_membership(&key(1), membership(2, 20)).unwrap();

        let replacement = CertificateChain::new(vec![
            Certificate::new(vec![1], vec![10]).with_encoded(vec![0xee])
        ]);
        storage.install_membership(&key(1), replacement.clone()).unwrap();

        let chains = storage.get_membership_certificates(&app(1)).unwrap();
        assert_eq!(chains, vec![replacement, membership(2, 20)]);

        let identity = membership(2, 20).leaf_identity().unwrap();
        storage.remove_membership(&key(1), &identity).unwrap();
        assert_eq!(storage.get_membership_certificates(&app(1)).unwrap().len(), 1);
    }

    #[test]
    fn policy_set_and_cleared() {
        let storage = claimed(1);
        storage.update_policy(&key(1), PermissionPolicy::new(3)).unwrap();
        assert_eq!(storage.get_policy(&app(1)).unwrap().version, 3);

        storage.remove_policy(&key(1)).unwrap();
        assert!(storage.get_policy(&app(1)).unwrap_err().is_end_of_data());
    }

    #[test]
    fn mutators_notify_listener() {
        let storage = InMemorySecurityStorage::new();
        let recorder = Arc::new(Recorder::default());
        storage.set_listener(recorder.clone());

        storage.claim_application(key(1), IdentityCertificateChain::default(), Manifest::default());
        storage.update_policy(&key(1), PermissionPolicy::new(1)).unwrap();
        assert!(storage.update_policy(&key(2), PermissionPolicy::new(1)).is_err());

        let seen = recorder.seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|record| record.key_info == key(1)));
    }

    #[test]
    fn closed_storage_fails() {
        let storage = claimed(1);
        storage.close();
        assert_eq!(storage.start_updates(&app(1)).unwrap_err(), StorageError::Closed);
        assert_eq!(
            storage.update_policy(&key(1), PermissionPolicy::new(1)).unwrap_err(),
            StorageError::Closed
        );
    }
}
