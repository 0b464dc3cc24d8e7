//! CLI command implementations.

pub mod dump;
pub mod inspect;
pub mod serve;
pub mod tables;
pub mod watch;
