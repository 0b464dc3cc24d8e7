//! Watch command implementation.

use livestore_core::{NotificationBus, Table};
use livestore_sync_client::{ClientConfig, NetworkClient, RetryConfig};
use std::sync::Arc;
use tracing::info;

/// Parses the `--table` filter. An empty filter watches every table.
pub fn parse_filter(names: &[String]) -> Result<Vec<Table>, Box<dyn std::error::Error>> {
    let mut tables = Vec::with_capacity(names.len());
    for name in names {
        tables.push(name.parse::<Table>()?);
    }
    Ok(tables)
}

fn render(table: Table, format: &str) -> String {
    match format {
        "json" => serde_json::json!({ "table": table }).to_string(),
        _ => table.to_string(),
    }
}

/// Runs the watch command until Ctrl-C.
///
/// Domain tables show up twice per change, once for the generic event and
/// once for the domain event.
pub async fn run(
    server: &str,
    tables: &[String],
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let filter = parse_filter(tables)?;
    let bus = Arc::new(NotificationBus::new());

    let format = format.to_string();
    let _subscription = bus.subscribe(move |table| {
        if filter.is_empty() || filter.contains(&table) {
            println!("{}", render(table, &format));
        }
    });

    let config = ClientConfig::new(server).with_retry(RetryConfig::unlimited());
    let client = NetworkClient::start(config, &bus);
    info!(server, "Watching for invalidations");

    tokio::signal::ctrl_c().await?;

    let stats = client.stats();
    info!(
        received = stats.received(),
        reconnects = stats.reconnects(),
        "Stopped watching"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_rejects_unlisted_names() {
        let ok = parse_filter(&["polls".to_string(), "messages".to_string()]).unwrap();
        assert_eq!(ok, vec![Table::Polls, Table::Messages]);

        assert!(parse_filter(&["audit_log".to_string()]).is_err());
        assert!(parse_filter(&[]).unwrap().is_empty());
    }

    #[test]
    fn renders_text_and_json() {
        assert_eq!(render(Table::VideoRooms, "text"), "video_rooms");
        assert_eq!(
            render(Table::VideoRooms, "json"),
            r#"{"table":"video_rooms"}"#
        );
    }
}
