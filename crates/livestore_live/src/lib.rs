//! # LiveStore Live
//!
//! Live query bindings for LiveStore.
//!
//! A live query ties a query function to a set of watched tables. It runs the
//! query once, then refetches in the background whenever the notification
//! bus reports one of those tables changed, whichever channel the report
//! came from.
//!
//! ## State Machine
//!
//! ```text
//! Initial (is_loading) --first fetch--> Loaded | Error
//! Loaded --watched change / refresh--> background fetch --> Loaded | Error
//! Error keeps the last data; a later success clears the error.
//! ```
//!
//! `is_loading` never goes back to true after the first fetch settles.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod query;
mod state;

pub use query::{use_live_query, LiveQuery};
pub use state::LiveState;
