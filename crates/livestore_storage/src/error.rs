//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record or document could not be encoded or decoded as JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A record has no string `id` field.
    #[error("record has no string `id` field")]
    MissingId,

    /// The fallback document is not shaped as table name -> array of records.
    #[error("fallback document corrupted: {0}")]
    Corrupted(String),

    /// The primary backend rejected or failed the operation.
    #[error("backend error: {0}")]
    Backend(String),

    /// The primary backend is not reachable.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend connection has shut down.
    #[error("storage is closed")]
    Closed,
}

impl StorageError {
    /// Creates a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(StorageError::Closed.to_string(), "storage is closed");
        assert!(StorageError::backend("disk full")
            .to_string()
            .contains("disk full"));
    }

    #[test]
    fn io_conversion() {
        let err: StorageError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, StorageError::Io(_)));
    }
}
