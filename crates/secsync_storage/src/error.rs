//! Error types for storage operations.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The requested record does not exist.
    ///
    /// Callers treat this as "not managed" or "not set", never as a failure.
    #[error("end of data")]
    EndOfData,

    /// A transaction is already open for the application.
    #[error("an update transaction is already active for {application}")]
    TransactionActive {
        /// Application key, formatted.
        application: String,
    },

    /// The transaction being completed was never started.
    #[error("no update transaction active for {application}")]
    UnknownTransaction {
        /// Application key, formatted.
        application: String,
    },

    /// The storage is closed.
    #[error("storage is closed")]
    Closed,

    /// The underlying store failed.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Returns true if this is the "no such record" marker.
    pub fn is_end_of_data(&self) -> bool {
        matches!(self, StorageError::EndOfData)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_of_data_marker() {
        assert!(StorageError::EndOfData.is_end_of_data());
        assert!(!StorageError::Closed.is_end_of_data());
    }

    #[test]
    fn error_display() {
        let err = StorageError::TransactionActive {
            application: "key:01".into(),
        };
        assert_eq!(
            err.to_string(),
            "an update transaction is already active for key:01"
        );
        assert_eq!(
            StorageError::Backend("disk full".into()).to_string(),
            "storage backend error: disk full"
        );
    }
}
