//! Engine statistics.
//!
//! Counters for which tier served each call. Callers cannot otherwise tell
//! the tiers apart, so these are the way to observe degraded operation.
//!
//! # Usage
//!
//! ```rust,ignore
//! let stats = engine.stats();
//! println!("Primary failures: {}", stats.primary_failures());
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Engine statistics and metrics.
///
/// All counters are atomic and can be read while operations are in progress.
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Calls served by the primary backend.
    primary_ops: AtomicU64,
    /// Calls served by the fallback store.
    fallback_ops: AtomicU64,
    /// Primary calls that failed and were retried on the fallback.
    primary_failures: AtomicU64,
    /// Mutations that published a notification.
    notifications: AtomicU64,
    /// Cross-context reloads of a fallback table.
    reloads: AtomicU64,
}

impl EngineStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_primary(&self) {
        self.primary_ops.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fallback(&self) {
        self.fallback_ops.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_primary_failure(&self) {
        self.primary_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_notification(&self) {
        self.notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reload(&self) {
        self.reloads.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of calls served by the primary backend.
    pub fn primary_ops(&self) -> u64 {
        self.primary_ops.load(Ordering::Relaxed)
    }

    /// Returns the number of calls served by the fallback store.
    pub fn fallback_ops(&self) -> u64 {
        self.fallback_ops.load(Ordering::Relaxed)
    }

    /// Returns the number of primary failures absorbed by the fallback.
    pub fn primary_failures(&self) -> u64 {
        self.primary_failures.load(Ordering::Relaxed)
    }

    /// Returns the number of notifications published by mutations.
    pub fn notifications(&self) -> u64 {
        self.notifications.load(Ordering::Relaxed)
    }

    /// Returns the number of fallback table reloads.
    pub fn reloads(&self) -> u64 {
        self.reloads.load(Ordering::Relaxed)
    }

    /// Returns a point-in-time copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            primary_ops: self.primary_ops(),
            fallback_ops: self.fallback_ops(),
            primary_failures: self.primary_failures(),
            notifications: self.notifications(),
            reloads: self.reloads(),
        }
    }
}

/// A copy of [`EngineStats`] at one moment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Calls served by the primary backend.
    pub primary_ops: u64,
    /// Calls served by the fallback store.
    pub fallback_ops: u64,
    /// Primary failures absorbed by the fallback.
    pub primary_failures: u64,
    /// Notifications published by mutations.
    pub notifications: u64,
    /// Fallback table reloads.
    pub reloads: u64,
}
