//! Error types for the sync engine.

use crate::proxy::ProxyError;
use secsync_core::ApplicationState;
use secsync_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Remote application error.
    #[error("remote error: {0}")]
    Proxy(#[from] ProxyError),

    /// The application is in a state that cannot be updated.
    #[error("unexpected application state {state} for update")]
    UnexpectedState {
        /// Current application state.
        state: ApplicationState,
    },

    /// Storage kept reporting new work for the application.
    #[error("update restarted {passes} times without settling")]
    RestartLimitExceeded {
        /// Number of passes performed.
        passes: u32,
    },

    /// The application is unknown to the security agent.
    #[error("application not found")]
    ApplicationNotFound,

    /// The event queue no longer accepts events.
    #[error("event queue is closed")]
    QueueClosed,

    /// The queue worker thread could not be started.
    #[error("failed to start worker thread: {0}")]
    WorkerSpawn(String),
}

impl SyncError {
    /// Returns true if the error is expected to clear on its own and is
    /// not worth reporting.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Proxy(ProxyError::NoSession))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors() {
        assert!(SyncError::from(ProxyError::NoSession).is_transient());
        assert!(!SyncError::from(ProxyError::ConnectionFailed("refused".into())).is_transient());
        assert!(!SyncError::from(StorageError::Closed).is_transient());
        assert!(!SyncError::QueueClosed.is_transient());
    }

    #[test]
    fn error_display() {
        let err = SyncError::UnexpectedState {
            state: ApplicationState::Claimable,
        };
        assert_eq!(err.to_string(), "unexpected application state CLAIMABLE for update");

        let err = SyncError::RestartLimitExceeded { passes: 32 };
        assert!(err.to_string().contains("32"));
    }
}
