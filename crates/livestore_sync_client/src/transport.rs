//! Outbound half of the network channel.

use crate::client::LinkState;
use livestore_core::{Table, Transport};
use livestore_sync_protocol::{encode_line, NetworkEvent};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

/// Name under which the network transport is attached to a bus.
pub const NETWORK_TRANSPORT: &str = "network";

/// Counters for one network client.
#[derive(Debug, Default)]
pub struct ClientStats {
    sent: AtomicU64,
    received: AtomicU64,
    dropped: AtomicU64,
    reconnects: AtomicU64,
}

impl ClientStats {
    /// Returns the number of events queued for the server.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Returns the number of events received and delivered locally.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Returns the number of outbound events dropped.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Returns the number of successful connections after the first.
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }
}

/// Bus transport that queues refresh events for the connection task.
///
/// Never blocks the publisher. While disconnected, or when the queue is
/// full, events are dropped.
pub struct NetworkTransport {
    outbound: mpsc::Sender<String>,
    connected: watch::Receiver<LinkState>,
    domain_events: bool,
    stats: Arc<ClientStats>,
}

impl NetworkTransport {
    pub(crate) fn new(
        outbound: mpsc::Sender<String>,
        connected: watch::Receiver<LinkState>,
        domain_events: bool,
        stats: Arc<ClientStats>,
    ) -> Self {
        Self {
            outbound,
            connected,
            domain_events,
            stats,
        }
    }

    fn events_for(&self, table: Table) -> Vec<NetworkEvent> {
        let mut events = vec![NetworkEvent::refresh_data(table.as_str())];
        if self.domain_events {
            if let Some(domain) = table.domain() {
                events.push(NetworkEvent::domain(domain, table.as_str()));
            }
        }
        events
    }

    fn queue(&self, event: &NetworkEvent) {
        let line = match encode_line(event) {
            Ok(line) => line,
            Err(e) => {
                warn!(event = %event.event, error = %e, "Could not encode network event");
                return;
            }
        };
        match self.outbound.try_send(line) {
            Ok(()) => {
                self.stats.sent.fetch_add(1, Ordering::Relaxed);
                trace!(event = %event.event, table = %event.table, "Queued network event");
            }
            Err(e) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(event = %event.event, error = %e, "Network event dropped");
            }
        }
    }
}

impl Transport for NetworkTransport {
    fn name(&self) -> &str {
        NETWORK_TRANSPORT
    }

    fn broadcast(&self, table: Table) {
        for event in self.events_for(table) {
            self.queue(&event);
        }
    }

    fn is_connected(&self) -> bool {
        *self.connected.borrow() == LinkState::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(
        domain_events: bool,
        buffer: usize,
    ) -> (NetworkTransport, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(buffer);
        let (_state_tx, state_rx) = watch::channel(LinkState::Connected);
        let stats = Arc::new(ClientStats::default());
        (
            NetworkTransport::new(tx, state_rx, domain_events, stats),
            rx,
        )
    }

    #[test]
    fn domain_tables_send_two_events() {
        let (transport, mut rx) = transport(true, 8);
        transport.broadcast(Table::Polls);
        transport.broadcast(Table::Users);

        let lines: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        let events: Vec<NetworkEvent> = lines
            .iter()
            .map(|l| livestore_sync_protocol::decode_line(l).unwrap())
            .collect();
        assert_eq!(
            events,
            vec![
                NetworkEvent::refresh_data("polls"),
                NetworkEvent::domain("polls", "polls"),
                NetworkEvent::refresh_data("users"),
            ]
        );
    }

    #[test]
    fn domain_events_can_be_disabled() {
        let (transport, mut rx) = transport(false, 8);
        transport.broadcast(Table::Messages);

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn full_queue_drops() {
        let (transport, _rx) = transport(false, 1);
        transport.broadcast(Table::Users);
        transport.broadcast(Table::Users);

        assert_eq!(transport.stats.sent(), 1);
        assert_eq!(transport.stats.dropped(), 1);
    }
}
