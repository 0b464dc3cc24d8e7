//! # LiveStore Sync Client
//!
//! Network notification channel for LiveStore.
//!
//! This crate provides:
//! - [`NetworkClient`]: a background connection to the coordination server
//! - [`NetworkTransport`]: the bus transport that forwards local publishes
//! - Reconnect with exponential backoff ([`RetryConfig`])
//!
//! ## Delivery
//!
//! The channel is best-effort. Events published while disconnected are
//! dropped, and nothing is replayed after a reconnect. Listeners that care
//! about missed changes should refetch when the link comes back.
//!
//! ## Echo Suppression
//!
//! Inbound events go to `NotificationBus::deliver_local`, so a received
//! event is never sent back to the server.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod client;
mod config;
mod error;
mod transport;

pub use client::{LinkState, NetworkClient};
pub use config::{ClientConfig, RetryConfig};
pub use error::{ClientError, ClientResult};
pub use transport::{ClientStats, NetworkTransport, NETWORK_TRANSPORT};
