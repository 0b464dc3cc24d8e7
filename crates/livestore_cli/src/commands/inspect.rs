//! Inspect command implementation.

use livestore_core::Table;
use livestore_storage::FallbackStore;
use serde::Serialize;
use std::path::Path;

/// Fallback document inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Document path.
    pub path: String,
    /// Document size in bytes.
    pub size: u64,
    /// Total records across all tables.
    pub record_count: usize,
    /// Per-table statistics, in name order.
    pub tables: Vec<TableStats>,
}

/// Statistics for a single table in the document.
#[derive(Debug, Serialize)]
pub struct TableStats {
    /// Table name as found in the document.
    pub name: String,
    /// Number of records.
    pub record_count: usize,
    /// False if the name is not on the allow-list. The engine never reads
    /// such tables.
    pub listed: bool,
}

/// Reads the document at `path` and counts its records.
pub async fn collect(path: &Path) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let size = match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len(),
        Err(_) => return Err(format!("No fallback document found at {:?}", path).into()),
    };

    let store = FallbackStore::open(path).await?;
    let tables: Vec<TableStats> = store
        .table_names()
        .into_iter()
        .map(|name| TableStats {
            record_count: store.len(&name),
            listed: name.parse::<Table>().is_ok(),
            name,
        })
        .collect();

    Ok(InspectResult {
        path: path.display().to_string(),
        size,
        record_count: tables.iter().map(|t| t.record_count).sum(),
        tables,
    })
}

/// Runs the inspect command.
pub async fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = collect(path).await?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("LiveStore Fallback Document");
    println!("===========================");
    println!();
    println!("Path:    {}", result.path);
    println!("Size:    {}", format_size(result.size));
    println!("Records: {}", result.record_count);
    println!();
    println!("Tables:");
    if result.tables.is_empty() {
        println!("  (none)");
    }
    for table in &result.tables {
        let marker = if table.listed { "" } else { "  (not on allow-list)" };
        println!("  {:<20} {:>8}{}", table.name, table.record_count, marker);
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livestore_core::Record;
    use tempfile::tempdir;

    #[tokio::test]
    async fn counts_records_per_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fallback.json");
        let store = FallbackStore::open(&path).await.unwrap();
        store.insert("sessions", Record::new("s1")).await.unwrap();
        store.insert("sessions", Record::new("s2")).await.unwrap();
        store.insert("legacy_feed", Record::new("x")).await.unwrap();

        let result = collect(&path).await.unwrap();
        assert_eq!(result.record_count, 3);
        assert!(result.size > 0);

        let names: Vec<_> = result.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["legacy_feed", "sessions"]);
        assert!(!result.tables[0].listed);
        assert!(result.tables[1].listed);
        assert_eq!(result.tables[1].record_count, 2);
    }

    #[tokio::test]
    async fn missing_document_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(collect(&dir.path().join("absent.json")).await.is_err());
    }

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }
}
