//! CLI error types.

use secsync_engine::SyncError;
use secsync_storage::StorageError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading or running a scenario.
#[derive(Error, Debug)]
pub enum CliError {
    /// The scenario file could not be read or written.
    #[error("scenario {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The scenario file is not valid JSON for a scenario.
    #[error("invalid scenario {path}: {source}")]
    Parse {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// Two applications share a key.
    #[error("duplicate application key {0}")]
    DuplicateApplication(String),

    /// Seeding the desired state failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The updater could not be started or fed.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Queued updates did not finish in time.
    #[error("updates still pending after {0:?}")]
    Timeout(Duration),
}

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;
