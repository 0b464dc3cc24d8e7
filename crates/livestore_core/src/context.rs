//! Cross-context notifications.
//!
//! Several engines on one host can share a single fallback document, one
//! engine per execution context. A [`BroadcastHub`] connects them: when one
//! context publishes a change, every other context reloads that table from
//! the shared document and only then notifies its own listeners, so a
//! listener that refetches sees the new data.
//!
//! ```rust,ignore
//! let hub = BroadcastHub::new();
//! let _a = attach_context(&engine_a, &hub);
//! let _b = attach_context(&engine_b, &hub);
//!
//! engine_a.insert(Table::Polls, poll).await?; // engine_b reloads "polls", then notifies
//! ```

use crate::bus::{NotificationBus, Transport};
use crate::engine::PersistenceEngine;
use crate::table::Table;
use livestore_sync_protocol::{ContextAction, ContextMessage};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Name under which the context transport is attached to a bus.
pub const CONTEXT_TRANSPORT: &str = "context";

const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct Envelope {
    origin: Uuid,
    payload: String,
}

/// Same-host broadcast medium shared by execution contexts.
///
/// Cloning the hub yields another handle to the same medium.
#[derive(Debug, Clone)]
pub struct BroadcastHub {
    tx: broadcast::Sender<Envelope>,
}

impl BroadcastHub {
    /// Creates a hub with the default backlog.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a hub that buffers up to `capacity` messages per slow context.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns the number of attached contexts.
    pub fn context_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Outbound side of one context's hub membership.
struct ContextChannel {
    origin: Uuid,
    hub: BroadcastHub,
}

impl Transport for ContextChannel {
    fn name(&self) -> &str {
        CONTEXT_TRANSPORT
    }

    fn broadcast(&self, table: Table) {
        let payload = match serde_json::to_string(&ContextMessage::refresh(table.as_str())) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(%table, error = %e, "Could not encode context message");
                return;
            }
        };
        let envelope = Envelope {
            origin: self.origin,
            payload,
        };
        if self.hub.tx.send(envelope).is_err() {
            trace!(%table, "No contexts listening");
        }
    }
}

/// Membership of one engine in a [`BroadcastHub`].
///
/// Dropping the handle leaves the hub.
#[must_use = "dropping a ContextHandle leaves the hub immediately"]
pub struct ContextHandle {
    origin: Uuid,
    bus: Weak<NotificationBus>,
    transport: u64,
    task: JoinHandle<()>,
}

impl ContextHandle {
    /// Returns the id this context stamps on outgoing messages.
    pub fn origin(&self) -> Uuid {
        self.origin
    }

    /// Leaves the hub.
    pub fn detach(self) {}
}

impl Drop for ContextHandle {
    fn drop(&mut self) {
        self.task.abort();
        if let Some(bus) = self.bus.upgrade() {
            bus.detach(self.transport);
        }
        debug!(origin = %self.origin, "Context detached");
    }
}

/// Joins `engine` to `hub`.
///
/// Local publishes on the engine's bus are forwarded to every other context.
/// Messages from other contexts reload the named table from the fallback
/// document, then deliver to local listeners without re-broadcasting.
///
/// Must be called from within a Tokio runtime.
pub fn attach_context(engine: &Arc<PersistenceEngine>, hub: &BroadcastHub) -> ContextHandle {
    let origin = Uuid::new_v4();
    let mut rx = hub.tx.subscribe();

    let transport = engine.bus().attach(Arc::new(ContextChannel {
        origin,
        hub: hub.clone(),
    }));

    let weak = Arc::downgrade(engine);
    let task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(envelope) => {
                    if envelope.origin == origin {
                        continue;
                    }
                    let Some(engine) = weak.upgrade() else { break };
                    handle_payload(&engine, &envelope.payload).await;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Context fell behind, refreshing every table");
                    let Some(engine) = weak.upgrade() else { break };
                    for table in Table::ALL {
                        refresh(&engine, table).await;
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    debug!(%origin, "Context attached");
    ContextHandle {
        origin,
        bus: Arc::downgrade(engine.bus()),
        transport,
        task,
    }
}

async fn handle_payload(engine: &PersistenceEngine, payload: &str) {
    let message: ContextMessage = match serde_json::from_str(payload) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "Ignoring malformed context message");
            return;
        }
    };
    let table: Table = match message.table.parse() {
        Ok(table) => table,
        Err(e) => {
            warn!(error = %e, "Ignoring context message");
            return;
        }
    };
    match message.action {
        ContextAction::Refresh => refresh(engine, table).await,
    }
}

async fn refresh(engine: &PersistenceEngine, table: Table) {
    // Listeners are told even if the reload fails: the sender may have
    // written to the primary.
    if let Err(e) = engine.reload_fallback_table(table).await {
        warn!(%table, error = %e, "Fallback reload failed");
    }
    engine.bus().deliver_local(table);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_without_peers_is_silent() {
        let hub = BroadcastHub::new();
        let channel = ContextChannel {
            origin: Uuid::new_v4(),
            hub: hub.clone(),
        };
        assert_eq!(hub.context_count(), 0);
        channel.broadcast(Table::Users);
    }

    #[tokio::test]
    async fn channel_encodes_context_message() {
        let hub = BroadcastHub::with_capacity(4);
        let mut rx = hub.tx.subscribe();
        let origin = Uuid::new_v4();
        ContextChannel {
            origin,
            hub: hub.clone(),
        }
        .broadcast(Table::PollVotes);

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.origin, origin);
        let message: ContextMessage = serde_json::from_str(&envelope.payload).unwrap();
        assert_eq!(message, ContextMessage::refresh("poll_votes"));
    }
}
