//! Tiered persistence engine.

use crate::bus::NotificationBus;
use crate::config::Config;
use crate::error::CoreResult;
use crate::stats::EngineStats;
use crate::table::{StorageMode, Table};
use livestore_storage::{FallbackStore, Fields, PrimaryBackend, Record, StorageError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Generates a fresh record id.
///
/// Callers own id generation; this is a convenience for callers without
/// their own scheme.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// The persistence engine.
///
/// Executes CRUD calls against the primary backend and falls back, per call,
/// to the disk-mirrored fallback store when the primary fails. Callers cannot
/// tell which tier served them.
///
/// Construct one engine per process at startup and pass the returned `Arc`
/// to everything that needs storage.
///
/// # Notifications
///
/// Every mutation that changed something publishes its table on the bus
/// after the write has completed.
///
/// # Example
///
/// ```rust,ignore
/// use livestore_core::{Config, NotificationBus, PersistenceEngine, Table};
/// use livestore_storage::Record;
/// use std::sync::Arc;
///
/// let bus = Arc::new(NotificationBus::new());
/// let engine = PersistenceEngine::open(Config::new().sqlite("primary.db"), bus).await?;
///
/// engine.insert(Table::Registrations, Record::new("r1").with("email", "a@x.com")).await?;
/// let all = engine.find_all(Table::Registrations).await?;
/// ```
pub struct PersistenceEngine {
    config: Config,
    primary: Option<Arc<dyn PrimaryBackend>>,
    fallback: FallbackStore,
    mode: RwLock<StorageMode>,
    bus: Arc<NotificationBus>,
    stats: EngineStats,
}

impl PersistenceEngine {
    /// Opens an engine, connecting the primary named in `config`.
    ///
    /// A primary that cannot be opened is logged and left out; the engine
    /// then runs in fallback mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the fallback document exists but cannot be read.
    pub async fn open(config: Config, bus: Arc<NotificationBus>) -> CoreResult<Arc<Self>> {
        let primary = match config.primary.connect() {
            Ok(primary) => primary,
            Err(e) => {
                warn!(error = %e, "Primary backend could not be opened, using fallback");
                None
            }
        };
        Self::open_with_primary(config, primary, bus).await
    }

    /// Opens an engine with an explicit primary backend (or none).
    ///
    /// `config.primary` is ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the fallback document exists but cannot be read.
    pub async fn open_with_primary(
        config: Config,
        primary: Option<Arc<dyn PrimaryBackend>>,
        bus: Arc<NotificationBus>,
    ) -> CoreResult<Arc<Self>> {
        let fallback = FallbackStore::open(&config.fallback_path).await?;

        let mode = if primary.is_some() && !config.probe_on_open {
            StorageMode::Primary
        } else {
            probe_mode(primary.as_deref()).await
        };

        info!(
            %mode,
            fallback = %config.fallback_path.display(),
            "Persistence engine opened"
        );

        Ok(Arc::new(Self {
            config,
            primary,
            fallback,
            mode: RwLock::new(mode),
            bus,
            stats: EngineStats::new(),
        }))
    }

    /// Returns the current storage mode.
    pub fn mode(&self) -> StorageMode {
        *self.mode.read()
    }

    /// Probes the primary again and updates the storage mode.
    pub async fn reprobe(&self) -> StorageMode {
        let mode = probe_mode(self.primary.as_deref()).await;
        let previous = std::mem::replace(&mut *self.mode.write(), mode);
        if previous != mode {
            info!(from = %previous, to = %mode, "Storage mode changed");
        }
        mode
    }

    /// Returns the notification bus mutations publish on.
    pub fn bus(&self) -> &Arc<NotificationBus> {
        &self.bus
    }

    /// Returns the engine statistics.
    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Returns the engine configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the fallback document path.
    pub fn fallback_path(&self) -> &Path {
        self.fallback.path()
    }

    /// Returns true if a primary backend is configured.
    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Returns every record of `table`.
    ///
    /// On the primary path, fallback copies (written while the primary was
    /// failing) replace primary rows with the same id and the rest are
    /// appended, so writes that fell back stay visible.
    ///
    /// # Errors
    ///
    /// Never fails today; the `Result` keeps room for fallback read errors.
    pub async fn find_all(&self, table: Table) -> CoreResult<Vec<Record>> {
        if let Some(primary) = self.active_primary() {
            match primary.find_all(table.as_str()).await {
                Ok(records) => {
                    self.stats.record_primary();
                    return Ok(self.overlay_fallback(table, records));
                }
                Err(e) => self.primary_failed(table, "find_all", &e),
            }
        }

        self.stats.record_fallback();
        Ok(self.fallback.find_all(table.as_str()))
    }

    /// Returns every record of `table` matching `predicate`.
    ///
    /// # Errors
    ///
    /// See [`PersistenceEngine::find_all`].
    pub async fn find_all_where<P>(&self, table: Table, predicate: P) -> CoreResult<Vec<Record>>
    where
        P: Fn(&Record) -> bool,
    {
        let mut records = self.find_all(table).await?;
        records.retain(|r| predicate(r));
        Ok(records)
    }

    /// Returns the first record of `table` matching `predicate`.
    ///
    /// # Errors
    ///
    /// See [`PersistenceEngine::find_all`].
    pub async fn find_one<P>(&self, table: Table, predicate: P) -> CoreResult<Option<Record>>
    where
        P: Fn(&Record) -> bool,
    {
        Ok(self
            .find_all(table)
            .await?
            .into_iter()
            .find(|r| predicate(r)))
    }

    /// Returns one record by id.
    ///
    /// # Errors
    ///
    /// See [`PersistenceEngine::find_all`].
    pub async fn find_by_id(&self, table: Table, id: &str) -> CoreResult<Option<Record>> {
        if let Some(primary) = self.active_primary() {
            // A fallback copy is newer than any primary row with its id.
            if let Some(parked) = self.fallback.find_by_id(table.as_str(), id) {
                self.stats.record_fallback();
                return Ok(Some(parked));
            }
            match primary.find_by_id(table.as_str(), id).await {
                Ok(Some(record)) => {
                    self.stats.record_primary();
                    return Ok(Some(record));
                }
                Ok(None) => self.stats.record_primary(),
                Err(e) => self.primary_failed(table, "find_by_id", &e),
            }
        }

        self.stats.record_fallback();
        Ok(self.fallback.find_by_id(table.as_str(), id))
    }

    /// Returns the number of records in `table`.
    ///
    /// # Errors
    ///
    /// See [`PersistenceEngine::find_all`].
    pub async fn count(&self, table: Table) -> CoreResult<usize> {
        Ok(self.find_all(table).await?.len())
    }

    /// Returns the number of records in `table` matching `predicate`.
    ///
    /// # Errors
    ///
    /// See [`PersistenceEngine::find_all`].
    pub async fn count_where<P>(&self, table: Table, predicate: P) -> CoreResult<usize>
    where
        P: Fn(&Record) -> bool,
    {
        Ok(self.find_all_where(table, predicate).await?.len())
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Inserts a record, replacing any record with the same id.
    ///
    /// Returns the stored record.
    ///
    /// # Errors
    ///
    /// Returns an error only if the call fell back and the fallback document
    /// could not be written.
    pub async fn insert(&self, table: Table, record: Record) -> CoreResult<Record> {
        let name = table.as_str();

        if let Some(primary) = self.active_primary() {
            match primary.insert(name, &record).await {
                Ok(()) => {
                    self.stats.record_primary();
                    self.drop_shadow(table, record.id()).await;
                    self.notify(table);
                    return Ok(record);
                }
                Err(e) => self.primary_failed(table, "insert", &e),
            }
        }

        self.stats.record_fallback();
        self.fallback.insert(name, record.clone()).await?;
        self.notify(table);
        Ok(record)
    }

    /// Merges `partial` into the record with `id`. The `id` key is ignored.
    ///
    /// Returns the updated record, or `None` if the serving tier has no such
    /// record. Nothing is published when nothing matched.
    ///
    /// # Errors
    ///
    /// Returns an error only if the call fell back and the fallback document
    /// could not be written.
    pub async fn update(
        &self,
        table: Table,
        id: &str,
        partial: &Fields,
    ) -> CoreResult<Option<Record>> {
        let name = table.as_str();

        if let Some(primary) = self.active_primary() {
            if let Some(parked) = self.fallback.find_by_id(name, id) {
                // Promote the newer fallback copy instead of updating the
                // stale primary row.
                let mut merged = parked;
                merged.merge(partial);
                match primary.insert(name, &merged).await {
                    Ok(()) => {
                        self.stats.record_primary();
                        self.drop_shadow(table, id).await;
                        self.notify(table);
                        return Ok(Some(merged));
                    }
                    Err(e) => self.primary_failed(table, "update", &e),
                }
            } else {
                match primary.update(name, id, partial).await {
                    Ok(Some(updated)) => {
                        self.stats.record_primary();
                        self.notify(table);
                        return Ok(Some(updated));
                    }
                    Ok(None) => self.stats.record_primary(),
                    Err(e) => self.primary_failed(table, "update", &e),
                }
            }
        }

        self.stats.record_fallback();
        let updated = self.fallback.update(name, id, partial).await?;
        if updated.is_some() {
            self.notify(table);
        }
        Ok(updated)
    }

    /// Removes the record with `id`.
    ///
    /// Returns the removed record, or `None` if the serving tier has no such
    /// record. Nothing is published when nothing matched.
    ///
    /// # Errors
    ///
    /// Returns an error only if the call fell back and the fallback document
    /// could not be written.
    pub async fn remove(&self, table: Table, id: &str) -> CoreResult<Option<Record>> {
        let name = table.as_str();

        if let Some(primary) = self.active_primary() {
            match primary.remove(name, id).await {
                Ok(Some(removed)) => {
                    self.stats.record_primary();
                    self.drop_shadow(table, id).await;
                    self.notify(table);
                    return Ok(Some(removed));
                }
                Ok(None) => self.stats.record_primary(),
                Err(e) => self.primary_failed(table, "remove", &e),
            }
        }

        self.stats.record_fallback();
        let removed = self.fallback.remove(name, id).await?;
        if removed.is_some() {
            self.notify(table);
        }
        Ok(removed)
    }

    /// Re-reads `table` from the shared fallback document.
    ///
    /// Used when another context reports a change, so that local reads see
    /// it before local listeners are told.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be read or parsed.
    pub async fn reload_fallback_table(&self, table: Table) -> CoreResult<usize> {
        let count = self.fallback.reload_table(table.as_str()).await?;
        self.stats.record_reload();
        Ok(count)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn active_primary(&self) -> Option<&Arc<dyn PrimaryBackend>> {
        self.primary
            .as_ref()
            .filter(|_| self.mode() == StorageMode::Primary)
    }

    fn primary_failed(&self, table: Table, op: &'static str, error: &StorageError) {
        self.stats.record_primary_failure();
        warn!(%table, op, %error, "Primary backend failed, serving from fallback");
    }

    /// Merges fallback copies into a primary result.
    ///
    /// Successful primary writes drop the fallback copy of their id, so a
    /// copy still parked in the fallback is newer than the primary row. It
    /// replaces that row, or is appended when the primary has none.
    fn overlay_fallback(&self, table: Table, mut records: Vec<Record>) -> Vec<Record> {
        let parked = self.fallback.find_all(table.as_str());
        if parked.is_empty() {
            return records;
        }
        let index: HashMap<String, usize> = records
            .iter()
            .enumerate()
            .map(|(i, r)| (r.id().to_string(), i))
            .collect();
        let mut fallback_only = Vec::new();
        for record in parked {
            match index.get(record.id()) {
                Some(&i) => records[i] = record,
                None => fallback_only.push(record),
            }
        }
        records.extend(fallback_only);
        records
    }

    /// Removes a fallback copy that the primary now supersedes.
    async fn drop_shadow(&self, table: Table, id: &str) {
        if self.fallback.find_by_id(table.as_str(), id).is_none() {
            return;
        }
        match self.fallback.remove(table.as_str(), id).await {
            Ok(_) => debug!(%table, id, "Dropped fallback copy superseded by primary"),
            Err(e) => warn!(%table, id, error = %e, "Could not drop superseded fallback copy"),
        }
    }

    fn notify(&self, table: Table) {
        self.stats.record_notification();
        self.bus.publish(table);
    }
}

async fn probe_mode(primary: Option<&dyn PrimaryBackend>) -> StorageMode {
    let Some(primary) = primary else {
        return StorageMode::Fallback;
    };
    match primary.probe().await {
        Ok(()) => StorageMode::Primary,
        Err(e) => {
            warn!(error = %e, "Primary probe failed, using fallback");
            StorageMode::Fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livestore_storage::SimPrimary;
    use serde_json::json;
    use tempfile::{tempdir, TempDir};

    async fn engine_with(
        primary: Option<Arc<SimPrimary>>,
    ) -> (TempDir, Arc<PersistenceEngine>) {
        let dir = tempdir().unwrap();
        let config = Config::new().fallback_path(dir.path().join("fallback.json"));
        let primary = primary.map(|p| p as Arc<dyn PrimaryBackend>);
        let engine = PersistenceEngine::open_with_primary(
            config,
            primary,
            Arc::new(NotificationBus::new()),
        )
        .await
        .unwrap();
        (dir, engine)
    }

    #[tokio::test]
    async fn no_primary_means_fallback_mode() {
        let (_dir, engine) = engine_with(None).await;
        assert_eq!(engine.mode(), StorageMode::Fallback);
        assert!(!engine.has_primary());
    }

    #[tokio::test]
    async fn failed_probe_means_fallback_mode() {
        let primary = Arc::new(SimPrimary::new());
        primary.set_available(false);
        let (_dir, engine) = engine_with(Some(primary.clone())).await;
        assert_eq!(engine.mode(), StorageMode::Fallback);

        primary.set_available(true);
        assert_eq!(engine.reprobe().await, StorageMode::Primary);
    }

    #[tokio::test]
    async fn single_failure_does_not_reset_mode() {
        let primary = Arc::new(SimPrimary::new());
        let (_dir, engine) = engine_with(Some(primary.clone())).await;

        primary.fail_next(1);
        engine
            .insert(Table::Users, Record::new("u1"))
            .await
            .unwrap();

        assert_eq!(engine.mode(), StorageMode::Primary);
        assert_eq!(engine.stats().primary_failures(), 1);
    }

    #[tokio::test]
    async fn primary_insert_supersedes_fallback_copy() {
        let primary = Arc::new(SimPrimary::new());
        let (_dir, engine) = engine_with(Some(primary.clone())).await;

        primary.fail_next(1);
        engine
            .insert(Table::Users, Record::new("u1").with("v", 1))
            .await
            .unwrap();
        engine
            .insert(Table::Users, Record::new("u1").with("v", 2))
            .await
            .unwrap();

        let all = engine.find_all(Table::Users).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].get("v"), Some(&json!(2)));

        // Removing from the primary must not resurrect the old fallback copy.
        engine.remove(Table::Users, "u1").await.unwrap();
        assert!(engine.find_all(Table::Users).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fallen_back_overwrite_is_visible() {
        let primary = Arc::new(SimPrimary::new());
        let (_dir, engine) = engine_with(Some(primary.clone())).await;

        engine
            .insert(Table::Users, Record::new("u0"))
            .await
            .unwrap();
        engine
            .insert(Table::Users, Record::new("u1").with("v", 1))
            .await
            .unwrap();
        primary.fail_next(1);
        engine
            .insert(Table::Users, Record::new("u1").with("v", 2))
            .await
            .unwrap();

        let all = engine.find_all(Table::Users).await.unwrap();
        let ids: Vec<_> = all.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec!["u0", "u1"]);
        assert_eq!(all[1].get("v"), Some(&json!(2)));

        let one = engine.find_by_id(Table::Users, "u1").await.unwrap().unwrap();
        assert_eq!(one.get("v"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn update_promotes_newer_fallback_copy() {
        let primary = Arc::new(SimPrimary::new());
        let (_dir, engine) = engine_with(Some(primary.clone())).await;

        engine
            .insert(Table::Users, Record::new("u1").with("v", 1))
            .await
            .unwrap();
        primary.fail_next(1);
        engine
            .insert(Table::Users, Record::new("u1").with("v", 2))
            .await
            .unwrap();

        let mut partial = Fields::new();
        partial.insert("name".into(), json!("Ann"));
        let updated = engine
            .update(Table::Users, "u1", &partial)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.get("v"), Some(&json!(2)));
        assert_eq!(updated.get_str("name"), Some("Ann"));

        // The merged copy now lives in the primary only.
        let stored = primary.records("users");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0], updated);
        assert_eq!(engine.find_all(Table::Users).await.unwrap(), vec![updated]);
    }

    #[tokio::test]
    async fn update_reaches_fallback_only_record() {
        let primary = Arc::new(SimPrimary::new());
        let (_dir, engine) = engine_with(Some(primary.clone())).await;

        primary.fail_next(1);
        engine
            .insert(Table::Tickets, Record::new("t1").with("status", "open"))
            .await
            .unwrap();

        let mut partial = Fields::new();
        partial.insert("status".into(), json!("used"));
        let updated = engine
            .update(Table::Tickets, "t1", &partial)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.get_str("status"), Some("used"));
    }

    #[tokio::test]
    async fn unmatched_mutations_do_not_publish() {
        let (_dir, engine) = engine_with(None).await;

        assert!(engine.remove(Table::Users, "ghost").await.unwrap().is_none());
        assert!(engine
            .update(Table::Users, "ghost", &Fields::new())
            .await
            .unwrap()
            .is_none());
        assert_eq!(engine.bus().published_count(), 0);
    }

    #[tokio::test]
    async fn find_one_and_count_where() {
        let (_dir, engine) = engine_with(None).await;
        for (id, role) in [("u1", "admin"), ("u2", "attendee"), ("u3", "attendee")] {
            engine
                .insert(Table::Users, Record::new(id).with("role", role))
                .await
                .unwrap();
        }

        let admin = engine
            .find_one(Table::Users, |r| r.get_str("role") == Some("admin"))
            .await
            .unwrap();
        assert_eq!(admin.map(|r| r.id().to_string()), Some("u1".into()));
        assert_eq!(
            engine
                .count_where(Table::Users, |r| r.get_str("role") == Some("attendee"))
                .await
                .unwrap(),
            2
        );
    }

    #[test]
    fn ids_are_unique() {
        assert_ne!(new_id(), new_id());
    }
}
