//! Storage error type.

use thiserror::Error;

/// Failures from the storage layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The configured backend name is not known.
    #[error("Could not find storage backend: {0}")]
    BackendNotFound(String),

    /// A database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// The worker thread running the call failed.
    #[error("storage worker failed: {0}")]
    Worker(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Database(err.to_string())
    }
}
