//! Dump command implementation.

use livestore_core::{Config, NotificationBus, PersistenceEngine, Record, StorageMode, Table};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Records of one table as the engine reads them.
#[derive(Debug, Serialize)]
pub struct DumpResult {
    /// Table name.
    pub table: Table,
    /// Tier the engine read from first.
    pub mode: StorageMode,
    /// Records in the table before `limit` was applied.
    pub total: usize,
    /// Printed records.
    pub records: Vec<Record>,
}

/// Opens an engine over `path` (and `sqlite`, if given) and reads `table`.
///
/// The name is checked against the allow-list before anything is opened.
pub async fn collect(
    path: &Path,
    sqlite: Option<&Path>,
    table: &str,
    limit: Option<usize>,
) -> Result<DumpResult, Box<dyn std::error::Error>> {
    let table: Table = table.parse()?;

    let mut config = Config::new().fallback_path(path);
    if let Some(sqlite) = sqlite {
        config = config.sqlite(sqlite);
    }
    let engine = PersistenceEngine::open(config, Arc::new(NotificationBus::new())).await?;

    let mut records = engine.find_all(table).await?;
    let total = records.len();
    if let Some(limit) = limit {
        records.truncate(limit);
    }

    Ok(DumpResult {
        table,
        mode: engine.mode(),
        total,
        records,
    })
}

/// Runs the dump command.
pub async fn run(
    path: &Path,
    sqlite: Option<&Path>,
    table: &str,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = collect(path, sqlite, table, limit).await?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            println!(
                "{} ({}): {} of {} records",
                result.table,
                result.mode,
                result.records.len(),
                result.total
            );
            for record in &result.records {
                println!("  {}", serde_json::to_string(record)?);
            }
        }
    }

    Ok(())
}
