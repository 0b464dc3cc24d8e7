//! # LiveStore Storage
//!
//! Storage tiers for LiveStore.
//!
//! This crate provides the lowest-level storage abstraction for LiveStore.
//! Backends are **table-name opaque**: they accept whatever table name they
//! are handed. Validating names against the allow-list is the engine's job.
//!
//! ## Design Principles
//!
//! - A record is an open JSON map with one mandatory string `id`
//! - The primary tier is async and may fail on any call
//! - The fallback tier is an in-memory map mirrored to one JSON document
//! - Every read hands back owned copies, never references into a store
//!
//! ## Available Tiers
//!
//! - [`SqliteBackend`] - Durable relational primary
//! - [`SimPrimary`] - In-memory primary with fault injection, for testing
//! - [`FallbackStore`] - Disk-mirrored degraded path
//!
//! ## Example
//!
//! ```rust
//! use livestore_storage::Record;
//! use serde_json::json;
//!
//! let record = Record::from_value(json!({"id": "r1", "email": "a@x.com"})).unwrap();
//! assert_eq!(record.id(), "r1");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod fallback;
mod record;
mod sim;
mod sqlite;

pub use backend::PrimaryBackend;
pub use error::{StorageError, StorageResult};
pub use fallback::FallbackStore;
pub use record::{Fields, Record, ID_FIELD};
pub use sim::SimPrimary;
pub use sqlite::SqliteBackend;
