//! Tables command implementation.

use livestore_core::Table;
use serde::Serialize;

/// One entry of the table allow-list.
#[derive(Debug, Serialize)]
pub struct TableInfo {
    /// Table name as stored and sent on the wire.
    pub name: &'static str,
    /// Narrow network event domain, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<&'static str>,
}

/// Returns the allow-list in declaration order.
pub fn collect() -> Vec<TableInfo> {
    Table::ALL
        .into_iter()
        .map(|table| TableInfo {
            name: table.as_str(),
            domain: table.domain(),
        })
        .collect()
}

/// Runs the tables command.
pub fn run(format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let tables = collect();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&tables)?);
        }
        _ => {
            for info in &tables {
                match info.domain {
                    Some(domain) => println!("{:<20} refresh:{}", info.name, domain),
                    None => println!("{}", info.name),
                }
            }
        }
    }

    Ok(())
}
