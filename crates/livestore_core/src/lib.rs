//! # LiveStore Core
//!
//! Tiered persistence engine for LiveStore.
//!
//! This crate provides:
//! - [`PersistenceEngine`]: CRUD over a primary backend with per-call
//!   fallback to a disk-mirrored JSON document
//! - [`NotificationBus`]: table invalidation hints for in-process listeners
//!   and attached transports
//! - [`BroadcastHub`]: same-host notification between execution contexts
//! - The [`Table`] allow-list
//!
//! # Guarantees
//!
//! - A write that returned successfully is readable by the next read on the
//!   same engine, whichever tier served it
//! - Notifications are published only after the write completed
//! - Unlisted tables are rejected before any I/O
//!
//! The network channel lives in `livestore_sync_client`.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod bus;
mod config;
mod context;
mod engine;
mod error;
mod stats;
mod table;

pub use bus::{Listener, NotificationBus, Subscription, Transport};
pub use config::{Config, PrimaryConfig};
pub use context::{attach_context, BroadcastHub, ContextHandle, CONTEXT_TRANSPORT};
pub use engine::{new_id, PersistenceEngine};
pub use error::{CoreError, CoreResult};
pub use stats::{EngineStats, StatsSnapshot};
pub use table::{StorageMode, Table};

pub use livestore_storage::{Fields, Record};
