//! Simulated primary backend for testing.

use crate::backend::PrimaryBackend;
use crate::error::{StorageError, StorageResult};
use crate::record::{Fields, Record};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// An in-memory primary backend with fault injection.
///
/// This backend behaves like a healthy primary until told otherwise, and is
/// suitable for:
/// - Unit tests of per-operation fallback
/// - Integration tests that need a primary without a database file
///
/// # Fault Injection
///
/// - [`SimPrimary::fail_next`] makes the next `n` calls fail, then recovers
/// - [`SimPrimary::set_available`] makes every call fail until re-enabled
///
/// Failed calls leave the stored data untouched.
///
/// # Example
///
/// ```rust
/// use livestore_storage::SimPrimary;
///
/// let primary = SimPrimary::new();
/// primary.fail_next(1);
/// assert_eq!(primary.pending_failures(), 1);
/// ```
#[derive(Debug)]
pub struct SimPrimary {
    tables: RwLock<BTreeMap<String, Vec<Record>>>,
    available: AtomicBool,
    pending_failures: AtomicU64,
    calls: AtomicU64,
    failures: AtomicU64,
}

impl SimPrimary {
    /// Creates a new empty, healthy primary.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
            pending_failures: AtomicU64::new(0),
            calls: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Makes the next `n` calls fail.
    pub fn fail_next(&self, n: u64) {
        self.pending_failures.store(n, Ordering::SeqCst);
    }

    /// Returns how many injected failures are still pending.
    pub fn pending_failures(&self) -> u64 {
        self.pending_failures.load(Ordering::SeqCst)
    }

    /// Marks the backend reachable or unreachable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Returns the total number of calls received, including failed ones.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Returns the number of calls that failed.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    /// Returns copies of the records held for `table`.
    pub fn records(&self, table: &str) -> Vec<Record> {
        self.tables.read().get(table).cloned().unwrap_or_default()
    }

    fn enter(&self, op: &str) -> StorageResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.available.load(Ordering::SeqCst) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::unavailable(format!("simulated outage during {op}")));
        }

        let injected = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::backend(format!("simulated failure during {op}")));
        }

        Ok(())
    }
}

impl Default for SimPrimary {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PrimaryBackend for SimPrimary {
    async fn probe(&self) -> StorageResult<()> {
        self.enter("probe")
    }

    async fn find_all(&self, table: &str) -> StorageResult<Vec<Record>> {
        self.enter("find_all")?;
        Ok(self.records(table))
    }

    async fn find_by_id(&self, table: &str, id: &str) -> StorageResult<Option<Record>> {
        self.enter("find_by_id")?;
        Ok(self
            .tables
            .read()
            .get(table)
            .and_then(|records| records.iter().find(|r| r.id() == id))
            .cloned())
    }

    async fn insert(&self, table: &str, record: &Record) -> StorageResult<()> {
        self.enter("insert")?;
        let mut tables = self.tables.write();
        let records = tables.entry(table.to_string()).or_default();
        match records.iter_mut().find(|r| r.id() == record.id()) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        Ok(())
    }

    async fn update(
        &self,
        table: &str,
        id: &str,
        partial: &Fields,
    ) -> StorageResult<Option<Record>> {
        self.enter("update")?;
        let mut tables = self.tables.write();
        let Some(record) = tables
            .get_mut(table)
            .and_then(|records| records.iter_mut().find(|r| r.id() == id))
        else {
            return Ok(None);
        };
        record.merge(partial);
        Ok(Some(record.clone()))
    }

    async fn remove(&self, table: &str, id: &str) -> StorageResult<Option<Record>> {
        self.enter("remove")?;
        let mut tables = self.tables.write();
        let Some(records) = tables.get_mut(table) else {
            return Ok(None);
        };
        Ok(records
            .iter()
            .position(|r| r.id() == id)
            .map(|pos| records.remove(pos)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn healthy_crud() {
        let primary = SimPrimary::new();
        primary.probe().await.unwrap();

        primary.insert("users", &Record::new("u1")).await.unwrap();
        assert_eq!(primary.find_all("users").await.unwrap().len(), 1);
        assert!(primary.find_by_id("users", "u1").await.unwrap().is_some());
        assert!(primary.remove("users", "u1").await.unwrap().is_some());
        assert!(primary.find_all("users").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fail_next_recovers() {
        let primary = SimPrimary::new();
        primary.fail_next(1);

        assert!(primary.insert("users", &Record::new("u1")).await.is_err());
        assert!(primary.records("users").is_empty());

        primary.insert("users", &Record::new("u1")).await.unwrap();
        assert_eq!(primary.records("users").len(), 1);
        assert_eq!(primary.call_count(), 2);
        assert_eq!(primary.failure_count(), 1);
    }

    #[tokio::test]
    async fn unavailable_fails_everything() {
        let primary = SimPrimary::new();
        primary.set_available(false);

        assert!(matches!(
            primary.probe().await,
            Err(StorageError::Unavailable(_))
        ));
        assert!(primary.find_all("users").await.is_err());

        primary.set_available(true);
        assert!(primary.probe().await.is_ok());
    }
}
