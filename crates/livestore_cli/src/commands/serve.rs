//! Serve command implementation.

use livestore_sync_server::{ServerConfig, SyncServer};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

/// Runs the coordination server until Ctrl-C.
pub async fn run(bind: SocketAddr, max_connections: usize) -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::new(bind).with_max_connections(max_connections);
    let server = Arc::new(SyncServer::new(config));
    let listener = server.bind().await?;

    let running = Arc::clone(&server);
    running
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    info!(relayed = server.relayed_count(), "Relayed events");
    Ok(())
}
