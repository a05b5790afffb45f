//! Security storage trait definition.

use crate::error::StorageResult;
use secsync_core::{
    IdentityCertificateChain, Manifest, MembershipCertificateChain, OnlineApplication,
    PermissionPolicy, PersistedApplicationRecord, TransactionId,
};

/// Transactional store of the desired security state per application.
///
/// # Invariants
///
/// - At most one update transaction is open per application
/// - The record returned by `start_updates` is owned by that transaction
///   until `complete_updates` is called
/// - `complete_updates` returns the id of the latest desired state; if it
///   differs from the id passed in, the state changed during the cycle
///
/// # Implementors
///
/// - [`super::InMemorySecurityStorage`] - For testing
pub trait SecurityStorage: Send + Sync {
    /// Opens an update transaction for the application.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::EndOfData`](crate::StorageError::EndOfData)
    /// if the application is not managed, or another error if the
    /// transaction cannot be opened.
    fn start_updates(
        &self,
        app: &OnlineApplication,
    ) -> StorageResult<(PersistedApplicationRecord, TransactionId)>;

    /// Closes the transaction, persisting the record's sync state.
    ///
    /// A sync state requested while the transaction was open (a removal or
    /// a new claim) is kept instead, and the returned id differs from
    /// `transaction` so the caller runs another pass.
    ///
    /// Returns the current transaction id for the application.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction was not open or cannot be
    /// persisted.
    fn complete_updates(
        &self,
        record: &PersistedApplicationRecord,
        transaction: TransactionId,
    ) -> StorageResult<TransactionId>;

    /// Returns the desired membership certificate chains.
    ///
    /// # Errors
    ///
    /// Returns an error if the application is unknown or the read fails.
    fn get_membership_certificates(
        &self,
        app: &OnlineApplication,
    ) -> StorageResult<Vec<MembershipCertificateChain>>;

    /// Returns the desired identity chain together with its manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if the application is unknown or the read fails.
    fn get_identity_certificates_and_manifest(
        &self,
        app: &OnlineApplication,
    ) -> StorageResult<(IdentityCertificateChain, Manifest)>;

    /// Returns the desired permission policy.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::EndOfData`](crate::StorageError::EndOfData)
    /// if no explicit policy is set.
    fn get_policy(&self, app: &OnlineApplication) -> StorageResult<PermissionPolicy>;
}

/// Receives notice that desired state changed for some applications.
///
/// Called after the change is committed and no storage lock is held.
/// Implementations must not block.
pub trait PendingChangesListener: Send + Sync {
    /// Called with the records whose desired state changed.
    fn on_pending_changes(&self, records: Vec<PersistedApplicationRecord>);
}
