//! Error types for LiveStore core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in LiveStore core operations.
///
/// Primary-backend failures never appear here: the engine absorbs them and
/// serves the call from the fallback tier. What remains is either a caller
/// mistake or a failure of the fallback tier itself.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Table name is not on the allow-list.
    #[error("unknown table: {name}")]
    UnknownTable {
        /// The rejected name.
        name: String,
    },

    /// Fallback storage error.
    #[error("storage error: {0}")]
    Storage(#[from] livestore_storage::StorageError),
}

impl CoreError {
    /// Creates an unknown table error.
    pub fn unknown_table(name: impl Into<String>) -> Self {
        Self::UnknownTable { name: name.into() }
    }

    /// Returns true if the caller named a table outside the allow-list.
    pub fn is_schema_violation(&self) -> bool {
        matches!(self, Self::UnknownTable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livestore_storage::StorageError;

    #[test]
    fn classification() {
        assert!(CoreError::unknown_table("bogus").is_schema_violation());
        assert!(!CoreError::from(StorageError::Closed).is_schema_violation());
    }

    #[test]
    fn error_display() {
        let err = CoreError::unknown_table("bogus");
        assert_eq!(err.to_string(), "unknown table: bogus");
    }
}
