//! Disk-mirrored fallback store.

use crate::error::{StorageError, StorageResult};
use crate::record::{Fields, Record};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, trace};

type Document = BTreeMap<String, Vec<Record>>;

/// The degraded storage tier.
///
/// Holds `table -> records` in memory and mirrors the whole map to a single
/// JSON document after every mutation. Data survives process restarts.
///
/// # Document Format
///
/// ```json
/// { "registrations": [ { "id": "r1", "email": "a@x.com" } ] }
/// ```
///
/// # Durability
///
/// Every mutation rewrites the full document (temp file, then rename). This
/// costs O(total stored bytes) per write and is sized for small and medium
/// datasets.
///
/// # Concurrency
///
/// Writes from this store are serialized by an async write gate so the
/// document always reflects the latest in-memory state. There is no locking
/// across processes: two stores sharing one document race, and the last full
/// write wins.
#[derive(Debug)]
pub struct FallbackStore {
    path: PathBuf,
    tables: RwLock<Document>,
    write_gate: Mutex<()>,
}

impl FallbackStore {
    /// Opens the store at `path`, loading the document if it exists.
    ///
    /// A missing or empty document yields an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the document exists but cannot be read or is not
    /// shaped as table name -> array of records.
    pub async fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let tables = read_document(&path).await?;
        debug!(
            path = %path.display(),
            tables = tables.len(),
            "Opened fallback document"
        );

        Ok(Self {
            path,
            tables: RwLock::new(tables),
            write_gate: Mutex::new(()),
        })
    }

    /// Returns the path to the backing document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns copies of every record in `table`.
    pub fn find_all(&self, table: &str) -> Vec<Record> {
        self.tables.read().get(table).cloned().unwrap_or_default()
    }

    /// Returns a copy of one record by id.
    pub fn find_by_id(&self, table: &str, id: &str) -> Option<Record> {
        self.tables
            .read()
            .get(table)
            .and_then(|records| records.iter().find(|r| r.id() == id))
            .cloned()
    }

    /// Returns the number of records in `table`.
    pub fn len(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, Vec::len)
    }

    /// Returns the names of every table present in the document.
    pub fn table_names(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }

    /// Inserts a record, replacing any record with the same id.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be written.
    pub async fn insert(&self, table: &str, record: Record) -> StorageResult<()> {
        let _gate = self.write_gate.lock().await;
        let mut staged = self.tables.read().clone();
        let records = staged.entry(table.to_string()).or_default();
        match records.iter_mut().find(|r| r.id() == record.id()) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        self.commit(staged).await
    }

    /// Merges `partial` into the record with `id`.
    ///
    /// Returns the updated record, or `None` (without writing) if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be written.
    pub async fn update(
        &self,
        table: &str,
        id: &str,
        partial: &Fields,
    ) -> StorageResult<Option<Record>> {
        let _gate = self.write_gate.lock().await;
        let mut staged = self.tables.read().clone();
        let Some(record) = staged
            .get_mut(table)
            .and_then(|records| records.iter_mut().find(|r| r.id() == id))
        else {
            return Ok(None);
        };
        record.merge(partial);
        let updated = record.clone();
        self.commit(staged).await?;
        Ok(Some(updated))
    }

    /// Removes a record by id.
    ///
    /// Returns the removed record, or `None` (without writing) if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be written.
    pub async fn remove(&self, table: &str, id: &str) -> StorageResult<Option<Record>> {
        let _gate = self.write_gate.lock().await;
        let mut staged = self.tables.read().clone();
        let Some(records) = staged.get_mut(table) else {
            return Ok(None);
        };
        let Some(pos) = records.iter().position(|r| r.id() == id) else {
            return Ok(None);
        };
        let removed = records.remove(pos);
        self.commit(staged).await?;
        Ok(Some(removed))
    }

    /// Replaces the in-memory copy of `table` with what is currently on disk.
    ///
    /// Other tables are left untouched. Returns the number of records loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be read or parsed.
    pub async fn reload_table(&self, table: &str) -> StorageResult<usize> {
        let _gate = self.write_gate.lock().await;
        let mut on_disk = read_document(&self.path).await?;
        let fresh = on_disk.remove(table);

        let mut tables = self.tables.write();
        let count = match fresh {
            Some(records) => {
                let count = records.len();
                tables.insert(table.to_string(), records);
                count
            }
            None => {
                tables.remove(table);
                0
            }
        };
        trace!(table, records = count, "Reloaded fallback table");
        Ok(count)
    }

    /// Writes `staged` to disk, then makes it the in-memory state.
    ///
    /// Must be called with the write gate held. On error the in-memory state
    /// is left as it was.
    async fn commit(&self, staged: Document) -> StorageResult<()> {
        let bytes = serde_json::to_vec(&staged)?;
        self.write(bytes).await?;
        *self.tables.write() = staged;
        Ok(())
    }

    async fn write(&self, bytes: Vec<u8>) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        trace!(path = %self.path.display(), bytes = bytes.len(), "Rewrote fallback document");
        Ok(())
    }
}

async fn read_document(path: &Path) -> StorageResult<Document> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Document::new()),
        Err(e) => return Err(e.into()),
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Document::new());
    }

    serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupted(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn record(id: &str, email: &str) -> Record {
        Record::new(id).with("email", email)
    }

    #[tokio::test]
    async fn open_missing_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fallback.json");

        let store = FallbackStore::open(&path).await.unwrap();
        assert!(store.find_all("registrations").is_empty());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn insert_rewrites_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fallback.json");

        let store = FallbackStore::open(&path).await.unwrap();
        store
            .insert("registrations", record("r1", "a@x.com"))
            .await
            .unwrap();

        let on_disk: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(
            on_disk,
            json!({"registrations": [{"id": "r1", "email": "a@x.com"}]})
        );
    }

    #[tokio::test]
    async fn insert_same_id_replaces() {
        let dir = tempdir().unwrap();
        let store = FallbackStore::open(dir.path().join("f.json")).await.unwrap();

        store.insert("users", record("u1", "old@x.com")).await.unwrap();
        store.insert("users", record("u1", "new@x.com")).await.unwrap();

        let all = store.find_all("users");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].get_str("email"), Some("new@x.com"));
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("f.json");

        {
            let store = FallbackStore::open(&path).await.unwrap();
            store.insert("events", record("e1", "x")).await.unwrap();
            store.insert("events", record("e2", "y")).await.unwrap();
            store.remove("events", "e1").await.unwrap();
        }

        let store = FallbackStore::open(&path).await.unwrap();
        let all = store.find_all("events");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id(), "e2");
    }

    #[tokio::test]
    async fn update_and_remove_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.json");
        let store = FallbackStore::open(&path).await.unwrap();

        let mut partial = Fields::new();
        partial.insert("email".into(), json!("z@x.com"));
        assert!(store.update("users", "nope", &partial).await.unwrap().is_none());
        assert!(store.remove("users", "nope").await.unwrap().is_none());
        // Nothing matched, so nothing was written.
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn update_merges_fields() {
        let dir = tempdir().unwrap();
        let store = FallbackStore::open(dir.path().join("f.json")).await.unwrap();
        store
            .insert("users", record("u1", "a@x.com").with("name", "Ann"))
            .await
            .unwrap();

        let mut partial = Fields::new();
        partial.insert("email".into(), json!("b@x.com"));
        let updated = store.update("users", "u1", &partial).await.unwrap().unwrap();

        assert_eq!(updated.get_str("email"), Some("b@x.com"));
        assert_eq!(updated.get_str("name"), Some("Ann"));
    }

    #[tokio::test]
    async fn returned_records_are_copies() {
        let dir = tempdir().unwrap();
        let store = FallbackStore::open(dir.path().join("f.json")).await.unwrap();
        store.insert("users", record("u1", "a@x.com")).await.unwrap();

        let mut copy = store.find_all("users");
        copy[0].set("email", "mutated@x.com");

        assert_eq!(
            store.find_by_id("users", "u1").unwrap().get_str("email"),
            Some("a@x.com")
        );
    }

    #[tokio::test]
    async fn reload_table_picks_up_other_writer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shared.json");

        let a = FallbackStore::open(&path).await.unwrap();
        let b = FallbackStore::open(&path).await.unwrap();

        a.insert("polls", record("p1", "q")).await.unwrap();
        assert!(b.find_all("polls").is_empty());

        assert_eq!(b.reload_table("polls").await.unwrap(), 1);
        assert_eq!(b.find_all("polls")[0].id(), "p1");
    }

    #[tokio::test]
    async fn corrupted_document_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.json");
        std::fs::write(&path, b"[1, 2, 3]").unwrap();

        let result = FallbackStore::open(&path).await;
        assert!(matches!(result, Err(StorageError::Corrupted(_))));
    }

    #[tokio::test]
    async fn failed_write_leaves_memory_unchanged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.json");
        let store = FallbackStore::open(&path).await.unwrap();
        store.insert("users", record("u1", "a@x.com")).await.unwrap();

        // A directory in the temp file's place makes every rewrite fail.
        std::fs::create_dir(dir.path().join("f.json.tmp")).unwrap();

        assert!(store.insert("users", record("ghost", "g@x.com")).await.is_err());

        let mut partial = Fields::new();
        partial.insert("email".into(), json!("b@x.com"));
        assert!(store.update("users", "u1", &partial).await.is_err());
        assert!(store.remove("users", "u1").await.is_err());

        let all = store.find_all("users");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].get_str("email"), Some("a@x.com"));

        let reopened = FallbackStore::open(&path).await.unwrap();
        assert_eq!(reopened.find_all("users"), all);
    }
}
