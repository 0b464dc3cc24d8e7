//! Error types for the network channel.

use livestore_core::CoreError;
use livestore_sync_protocol::ProtocolError;
use std::io;
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur on the network channel.
///
/// None of these reach publishers: the bus treats the network as
/// best-effort. They surface in logs and from [`crate::NetworkClient::wait_connected`].
#[derive(Error, Debug)]
pub enum ClientError {
    /// Connecting to the server failed.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The server sent something that is not a refresh event.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The server named a table outside the allow-list.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// I/O error on the socket.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// The client stopped reconnecting.
    #[error("gave up after {attempts} connection attempts")]
    GaveUp {
        /// Consecutive failed attempts.
        attempts: u32,
    },

    /// The client was detached.
    #[error("client closed")]
    Closed,
}

impl ClientError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Classifies a failed connect.
    ///
    /// A malformed server address never starts working, so it is fatal.
    /// Everything else (refused, unreachable, lookup failures) may clear up.
    pub fn from_connect(error: &io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::InvalidInput => Self::transport_fatal(error.to_string()),
            _ => Self::transport_retryable(error.to_string()),
        }
    }

    /// Returns true if reconnecting may help.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport { retryable, .. } => *retryable,
            ClientError::Io(_) | ClientError::Timeout => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(ClientError::transport_retryable("connection lost").is_retryable());
        assert!(!ClientError::transport_fatal("bad address").is_retryable());
        assert!(ClientError::Timeout.is_retryable());
        assert!(!ClientError::Closed.is_retryable());
        assert!(!ClientError::GaveUp { attempts: 3 }.is_retryable());
    }

    #[test]
    fn connect_errors_are_classified() {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert!(ClientError::from_connect(&refused).is_retryable());

        let malformed = io::Error::new(io::ErrorKind::InvalidInput, "invalid socket address");
        assert!(!ClientError::from_connect(&malformed).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = ClientError::GaveUp { attempts: 7 };
        assert_eq!(err.to_string(), "gave up after 7 connection attempts");
    }
}
