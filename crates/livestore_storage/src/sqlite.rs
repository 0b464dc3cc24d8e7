//! SQLite primary backend.
//!
//! Owns a dedicated OS thread that holds the `rusqlite::Connection`. Async
//! callers send [`DbCommand`] messages over a bounded channel and await a
//! `tokio::sync::oneshot` reply, so the executor never blocks on SQLite.
//!
//! # Row Mapping
//!
//! Each table has an `id TEXT PRIMARY KEY` column plus one column per record
//! field, added on first use. Field values are stored as JSON text, so nested
//! objects and arrays are reconstructed exactly on read. A `NULL` column means
//! the record does not have that field.

use crate::backend::PrimaryBackend;
use crate::error::{StorageError, StorageResult};
use crate::record::{Fields, Record, ID_FIELD};
use async_trait::async_trait;
use rusqlite::{params_from_iter, Connection};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use tokio::sync::oneshot;

/// Bound on queued commands. A full queue fails the call, so the engine
/// serves it from the fallback instead of blocking the executor.
const COMMAND_QUEUE: usize = 64;

type Reply<T> = oneshot::Sender<StorageResult<T>>;

enum DbCommand {
    Probe {
        reply: Reply<()>,
    },
    FindAll {
        table: String,
        reply: Reply<Vec<Record>>,
    },
    FindById {
        table: String,
        id: String,
        reply: Reply<Option<Record>>,
    },
    Insert {
        table: String,
        record: Record,
        reply: Reply<()>,
    },
    Update {
        table: String,
        id: String,
        partial: Fields,
        reply: Reply<Option<Record>>,
    },
    Remove {
        table: String,
        id: String,
        reply: Reply<Option<Record>>,
    },
}

/// SQLite primary backend.
///
/// `Clone` is cheap: it only clones the channel handle. The connection
/// thread exits once every clone has been dropped.
///
/// # Example
///
/// ```rust,ignore
/// use livestore_storage::SqliteBackend;
/// use std::sync::Arc;
///
/// let primary = Arc::new(SqliteBackend::open("./data/primary.db")?);
/// ```
#[derive(Clone)]
pub struct SqliteBackend {
    tx: SyncSender<DbCommand>,
}

impl SqliteBackend {
    /// Opens (or creates) a database at `path` and starts the connection thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the thread
    /// cannot be spawned.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::start(conn)
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection thread cannot be spawned.
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::start(Connection::open_in_memory()?)
    }

    fn start(conn: Connection) -> StorageResult<Self> {
        let (tx, rx) = sync_channel::<DbCommand>(COMMAND_QUEUE);
        std::thread::Builder::new()
            .name("livestore-sqlite".to_string())
            .spawn(move || run_db_thread(conn, rx))?;
        Ok(Self { tx })
    }

    async fn call<T>(&self, command: impl FnOnce(Reply<T>) -> DbCommand) -> StorageResult<T> {
        let (reply, rx) = oneshot::channel();
        enqueue(&self.tx, command(reply))?;
        rx.await.map_err(|_| StorageError::Closed)?
    }
}

fn enqueue<C>(tx: &SyncSender<C>, command: C) -> StorageResult<()> {
    match tx.try_send(command) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(_)) => Err(StorageError::unavailable("sqlite command queue full")),
        Err(TrySendError::Disconnected(_)) => Err(StorageError::Closed),
    }
}

#[async_trait]
impl PrimaryBackend for SqliteBackend {
    async fn probe(&self) -> StorageResult<()> {
        self.call(|reply| DbCommand::Probe { reply }).await
    }

    async fn find_all(&self, table: &str) -> StorageResult<Vec<Record>> {
        let table = table.to_string();
        self.call(|reply| DbCommand::FindAll { table, reply }).await
    }

    async fn find_by_id(&self, table: &str, id: &str) -> StorageResult<Option<Record>> {
        let (table, id) = (table.to_string(), id.to_string());
        self.call(|reply| DbCommand::FindById { table, id, reply })
            .await
    }

    async fn insert(&self, table: &str, record: &Record) -> StorageResult<()> {
        let (table, record) = (table.to_string(), record.clone());
        self.call(|reply| DbCommand::Insert {
            table,
            record,
            reply,
        })
        .await
    }

    async fn update(
        &self,
        table: &str,
        id: &str,
        partial: &Fields,
    ) -> StorageResult<Option<Record>> {
        let (table, id, partial) = (table.to_string(), id.to_string(), partial.clone());
        self.call(|reply| DbCommand::Update {
            table,
            id,
            partial,
            reply,
        })
        .await
    }

    async fn remove(&self, table: &str, id: &str) -> StorageResult<Option<Record>> {
        let (table, id) = (table.to_string(), id.to_string());
        self.call(|reply| DbCommand::Remove { table, id, reply })
            .await
    }
}

// ---------------------------------------------------------------------------
// Connection thread
// ---------------------------------------------------------------------------

fn run_db_thread(conn: Connection, rx: Receiver<DbCommand>) {
    let mut schema = Schema::default();
    while let Ok(cmd) = rx.recv() {
        match cmd {
            DbCommand::Probe { reply } => {
                let result = conn
                    .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                    .map(|_| ())
                    .map_err(StorageError::from);
                let _ = reply.send(result);
            }
            DbCommand::FindAll { table, reply } => {
                let result = schema
                    .ensure_table(&conn, &table)
                    .and_then(|()| select(&conn, &table, None));
                let _ = reply.send(result);
            }
            DbCommand::FindById { table, id, reply } => {
                let result = schema
                    .ensure_table(&conn, &table)
                    .and_then(|()| select_one(&conn, &table, &id));
                let _ = reply.send(result);
            }
            DbCommand::Insert {
                table,
                record,
                reply,
            } => {
                let _ = reply.send(insert(&conn, &mut schema, &table, &record));
            }
            DbCommand::Update {
                table,
                id,
                partial,
                reply,
            } => {
                let _ = reply.send(update(&conn, &mut schema, &table, &id, &partial));
            }
            DbCommand::Remove { table, id, reply } => {
                let result = schema.ensure_table(&conn, &table).and_then(|()| {
                    let existing = select_one(&conn, &table, &id)?;
                    if existing.is_some() {
                        conn.execute(
                            &format!("DELETE FROM {} WHERE id = ?1", quote(&table)),
                            [&id],
                        )?;
                    }
                    Ok(existing)
                });
                let _ = reply.send(result);
            }
        }
    }
    // Every sender dropped: exit cleanly.
}

/// Known columns per table, so `ALTER TABLE` only runs for new fields.
#[derive(Default)]
struct Schema {
    columns: HashMap<String, HashSet<String>>,
}

impl Schema {
    fn ensure_table(&mut self, conn: &Connection, table: &str) -> StorageResult<()> {
        if self.columns.contains_key(table) {
            return Ok(());
        }

        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (id TEXT PRIMARY KEY NOT NULL)",
            quote(table)
        ))?;

        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote(table)))?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<HashSet<_>, _>>()?;
        self.columns.insert(table.to_string(), names);
        Ok(())
    }

    fn ensure_columns<'a>(
        &mut self,
        conn: &Connection,
        table: &str,
        keys: impl Iterator<Item = &'a String>,
    ) -> StorageResult<()> {
        self.ensure_table(conn, table)?;
        let known = self.columns.entry(table.to_string()).or_default();
        for key in keys {
            if !known.contains(key) {
                conn.execute_batch(&format!(
                    "ALTER TABLE {} ADD COLUMN {}",
                    quote(table),
                    quote(key)
                ))?;
                known.insert(key.clone());
            }
        }
        Ok(())
    }
}

fn insert(
    conn: &Connection,
    schema: &mut Schema,
    table: &str,
    record: &Record,
) -> StorageResult<()> {
    let fields: Vec<(&String, &Value)> = record
        .fields()
        .iter()
        .filter(|(k, _)| k.as_str() != ID_FIELD)
        .collect();
    schema.ensure_columns(conn, table, fields.iter().map(|(k, _)| *k))?;

    let mut columns = vec![quote(ID_FIELD)];
    let mut values = vec![record.id().to_string()];
    for (key, value) in &fields {
        columns.push(quote(key));
        values.push(serde_json::to_string(value)?);
    }
    let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{i}")).collect();

    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            quote(table),
            columns.join(", "),
            placeholders.join(", ")
        ),
        params_from_iter(values.iter()),
    )?;
    Ok(())
}

fn update(
    conn: &Connection,
    schema: &mut Schema,
    table: &str,
    id: &str,
    partial: &Fields,
) -> StorageResult<Option<Record>> {
    let fields: Vec<(&String, &Value)> = partial
        .iter()
        .filter(|(k, _)| k.as_str() != ID_FIELD)
        .collect();
    schema.ensure_columns(conn, table, fields.iter().map(|(k, _)| *k))?;

    if !fields.is_empty() {
        let mut assignments = Vec::with_capacity(fields.len());
        let mut values = Vec::with_capacity(fields.len() + 1);
        for (i, (key, value)) in fields.iter().enumerate() {
            assignments.push(format!("{} = ?{}", quote(key), i + 1));
            values.push(serde_json::to_string(value)?);
        }
        values.push(id.to_string());

        let changed = conn.execute(
            &format!(
                "UPDATE {} SET {} WHERE id = ?{}",
                quote(table),
                assignments.join(", "),
                values.len()
            ),
            params_from_iter(values.iter()),
        )?;
        if changed == 0 {
            return Ok(None);
        }
    }

    // Read back what was actually written.
    select_one(conn, table, id)
}

fn select_one(conn: &Connection, table: &str, id: &str) -> StorageResult<Option<Record>> {
    Ok(select(conn, table, Some(id))?.into_iter().next())
}

fn select(conn: &Connection, table: &str, id: Option<&str>) -> StorageResult<Vec<Record>> {
    let sql = match id {
        Some(_) => format!("SELECT * FROM {} WHERE id = ?1", quote(table)),
        None => format!("SELECT * FROM {} ORDER BY rowid", quote(table)),
    };
    let mut stmt = conn.prepare(&sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let rows = stmt.query_map(params_from_iter(id.into_iter()), |row| {
        (0..names.len())
            .map(|i| row.get::<_, Option<String>>(i))
            .collect::<Result<Vec<_>, _>>()
    })?;

    let mut records = Vec::new();
    for cells in rows {
        records.push(row_to_record(&names, cells?)?);
    }
    Ok(records)
}

fn row_to_record(names: &[String], cells: Vec<Option<String>>) -> StorageResult<Record> {
    let mut fields = Fields::new();
    for (name, cell) in names.iter().zip(cells) {
        let Some(text) = cell else {
            continue;
        };
        let value = if name == ID_FIELD {
            Value::String(text)
        } else {
            serde_json::from_str(&text)?
        };
        fields.insert(name.clone(), value);
    }
    Record::from_fields(fields)
}

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
