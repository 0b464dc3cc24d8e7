//! # LiveStore Sync Server
//!
//! Coordination server for LiveStore change notifications.
//!
//! This crate provides:
//! - A TCP server speaking newline-delimited JSON
//! - A session registry with bounded per-session queues
//! - Relay of `refresh:*` events to every session except the sender
//!
//! # Protocol
//!
//! Each line is one event:
//!
//! ```json
//! {"event": "refresh:data", "table": "sessions"}
//! ```
//!
//! Lines that are not refresh events are ignored. The server is a pure
//! relay: it keeps no records, validates no table names, and never replays
//! events to late joiners.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod server;

pub use config::{ServerConfig, DEFAULT_PORT};
pub use error::{ServerError, ServerResult};
pub use handler::{Frame, HandlerContext, RequestHandler};
pub use server::SyncServer;
