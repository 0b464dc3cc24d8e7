//! Primary backend trait definition.

use crate::error::StorageResult;
use crate::record::{Fields, Record};
use async_trait::async_trait;

/// The durable primary storage tier.
///
/// Any call may fail. The engine treats every failure as transient and
/// retries the same operation against the fallback tier, so implementations
/// should return errors rather than retry internally.
///
/// # Invariants
///
/// - `insert` replaces an existing record with the same id
/// - `update` returns the row as re-read after the write
/// - Records come back with every field they were stored with
///
/// # Implementors
///
/// - [`super::SqliteBackend`] - For durable storage
/// - [`super::SimPrimary`] - For testing
#[async_trait]
pub trait PrimaryBackend: Send + Sync {
    /// Checks that the backend is reachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot serve requests.
    async fn probe(&self) -> StorageResult<()>;

    /// Returns every record of a table.
    async fn find_all(&self, table: &str) -> StorageResult<Vec<Record>>;

    /// Returns one record by id.
    async fn find_by_id(&self, table: &str, id: &str) -> StorageResult<Option<Record>>;

    /// Inserts a record, replacing any record with the same id.
    async fn insert(&self, table: &str, record: &Record) -> StorageResult<()>;

    /// Merges `partial` into the record with `id`.
    ///
    /// Returns the updated record, or `None` if no such record exists.
    async fn update(&self, table: &str, id: &str, partial: &Fields)
        -> StorageResult<Option<Record>>;

    /// Removes a record by id.
    ///
    /// Returns the removed record, or `None` if no such record exists.
    async fn remove(&self, table: &str, id: &str) -> StorageResult<Option<Record>>;
}
