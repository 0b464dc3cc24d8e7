//! Error types for the coordination server.

use livestore_sync_protocol::ProtocolError;
use std::io::ErrorKind;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the coordination server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// A session sent a line that is not a valid event.
    #[error("invalid event: {0}")]
    Protocol(#[from] ProtocolError),

    /// Too many sessions are connected.
    #[error("connection limit reached ({0})")]
    ConnectionLimit(usize),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Returns true if the error was caused by a session: what it sent, how
    /// it went away, or that there was no room for it.
    pub fn is_client_error(&self) -> bool {
        match self {
            ServerError::Protocol(_) | ServerError::ConnectionLimit(_) => true,
            ServerError::Io(e) => matches!(
                e.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
                    | ErrorKind::UnexpectedEof
                    | ErrorKind::InvalidData
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn error_classification() {
        assert!(ServerError::from(ProtocolError::EmptyLine).is_client_error());
        assert!(ServerError::ConnectionLimit(1).is_client_error());

        let reset = io::Error::new(ErrorKind::ConnectionReset, "peer reset");
        assert!(ServerError::from(reset).is_client_error());
        let oversized = io::Error::new(ErrorKind::InvalidData, "line too long");
        assert!(ServerError::from(oversized).is_client_error());

        let denied = io::Error::new(ErrorKind::PermissionDenied, "no");
        assert!(!ServerError::from(denied).is_client_error());
    }

    #[test]
    fn error_display() {
        let err = ServerError::ConnectionLimit(10);
        assert!(err.to_string().contains("10"));
    }
}
