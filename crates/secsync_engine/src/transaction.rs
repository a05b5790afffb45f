//! Scoped storage update transaction.

use secsync_core::{OnlineApplication, PersistedApplicationRecord, SyncState, TransactionId};
use secsync_storage::{SecurityStorage, StorageResult};
use tracing::warn;

/// An open update transaction on one application's record.
///
/// The transaction is closed exactly once: explicitly through
/// [`finish`](Self::finish), or on drop if the pass returned early or
/// unwound. Closing on drop discards the result, so a pass that cares
/// about the returned id must call `finish`.
pub struct UpdateTransaction<'a, S: SecurityStorage + ?Sized> {
    storage: &'a S,
    record: PersistedApplicationRecord,
    id: TransactionId,
    finished: bool,
}

impl<'a, S: SecurityStorage + ?Sized> UpdateTransaction<'a, S> {
    /// Opens a transaction for the application.
    ///
    /// # Errors
    ///
    /// Propagates the storage error, `EndOfData` included.
    pub fn open(storage: &'a S, app: &OnlineApplication) -> StorageResult<Self> {
        let (record, id) = storage.start_updates(app)?;
        Ok(Self {
            storage,
            record,
            id,
            finished: false,
        })
    }

    /// Returns the record owned by this transaction.
    pub fn record(&self) -> &PersistedApplicationRecord {
        &self.record
    }

    /// Returns the sync state recorded so far.
    pub fn sync_state(&self) -> SyncState {
        self.record.sync_state
    }

    /// Advances the record's sync state.
    pub fn set_sync_state(&mut self, state: SyncState) {
        self.record.sync_state = state;
    }

    /// Returns the id the transaction was opened with.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Closes the transaction and returns the id storage now reports.
    ///
    /// # Errors
    ///
    /// Returns the storage error if the record could not be persisted.
    pub fn finish(mut self) -> StorageResult<TransactionId> {
        self.finished = true;
        self.storage.complete_updates(&self.record, self.id)
    }
}

impl<S: SecurityStorage + ?Sized> Drop for UpdateTransaction<'_, S> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.storage.complete_updates(&self.record, self.id) {
            warn!(
                application = %self.record.key_info,
                transaction = %self.id,
                error = %e,
                "failed to close abandoned update transaction"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secsync_core::{ApplicationState, IdentityCertificateChain, KeyInfo, Manifest};
    use secsync_storage::{InMemorySecurityStorage, StorageError};

    fn setup() -> (InMemorySecurityStorage, OnlineApplication) {
        let storage = InMemorySecurityStorage::new();
        let key = KeyInfo::from_key_id(vec![7]);
        storage.claim_application(
            key.clone(),
            IdentityCertificateChain::default(),
            Manifest::default(),
        );
        (storage, OnlineApplication::new(":1.7", ApplicationState::Claimed, key))
    }

    #[test]
    fn finish_closes_and_persists() {
        let (storage, app) = setup();
        let mut txn = UpdateTransaction::open(&storage, &app).unwrap();
        assert!(storage.transaction_active(&app.key_info));

        txn.set_sync_state(SyncState::WillReset);
        let opened = txn.id();
        assert_eq!(txn.finish().unwrap(), opened);

        assert!(!storage.transaction_active(&app.key_info));
        let record = storage.get_managed_application(&app.key_info).unwrap();
        assert_eq!(record.sync_state, SyncState::WillReset);
    }

    #[test]
    fn drop_closes_unfinished_transaction() {
        let (storage, app) = setup();
        {
            let _txn = UpdateTransaction::open(&storage, &app).unwrap();
            assert!(matches!(
                UpdateTransaction::open(&storage, &app),
                Err(StorageError::TransactionActive { .. })
            ));
        }
        assert!(!storage.transaction_active(&app.key_info));
        assert!(UpdateTransaction::open(&storage, &app).is_ok());
    }

    #[test]
    fn unwinding_closes_transaction() {
        let (storage, app) = setup();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _txn = UpdateTransaction::open(&storage, &app).unwrap();
            panic!("pass failed");
        }));
        assert!(result.is_err());
        assert!(!storage.transaction_active(&app.key_info));
    }

    #[test]
    fn unmanaged_application_is_end_of_data() {
        let storage = InMemorySecurityStorage::new();
        let app = OnlineApplication::new(":1.1", ApplicationState::Claimed, KeyInfo::from_key_id(vec![1]));
        assert!(matches!(
            UpdateTransaction::open(&storage, &app),
            Err(StorageError::EndOfData)
        ));
    }
}
