//! Error types for protocol encoding and decoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while framing or parsing messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The message is not valid JSON for the expected type.
    #[error("invalid message: {0}")]
    Json(#[from] serde_json::Error),

    /// A line exceeded the maximum frame size.
    #[error("line too long: {len} bytes exceeds {max}")]
    LineTooLong {
        /// Length of the offending line.
        len: usize,
        /// Maximum allowed length.
        max: usize,
    },

    /// A line contained only whitespace.
    #[error("empty line")]
    EmptyLine,

    /// An event name does not use the `refresh:` namespace.
    #[error("not a refresh event: {0}")]
    NotRefresh(String),
}
