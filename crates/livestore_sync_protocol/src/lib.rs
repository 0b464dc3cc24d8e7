//! # LiveStore Sync Protocol
//!
//! Wire types for LiveStore change notifications.
//!
//! This crate provides:
//! - [`ContextMessage`] for same-host cross-context broadcast
//! - [`NetworkEvent`] for coordination-server relay between sessions
//! - Newline-delimited JSON framing
//!
//! Every message is an invalidation hint naming a table. None of them carry
//! record data. Table names travel as plain strings; receivers validate them
//! against their own allow-list.
//!
//! Apart from `read_frame` (behind the `tokio` feature), this crate does
//! no I/O.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod framing;
#[cfg(feature = "tokio")]
mod io;
mod messages;

pub use error::{ProtocolError, ProtocolResult};
pub use framing::{decode_line, encode_line, MAX_LINE_LEN};
#[cfg(feature = "tokio")]
pub use io::read_frame;
pub use messages::{ContextAction, ContextMessage, NetworkEvent, REFRESH_DATA, REFRESH_PREFIX};
