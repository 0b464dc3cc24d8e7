//! Session registry and event relay.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use livestore_sync_protocol::{decode_line, encode_line, NetworkEvent};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};
use uuid::Uuid;

/// An encoded event line, shared between every session it is relayed to.
pub type Frame = Arc<str>;

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Outbound queues of connected sessions.
    sessions: RwLock<HashMap<Uuid, mpsc::Sender<Frame>>>,
    relayed: AtomicU64,
    dropped: AtomicU64,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            relayed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Registers a session and returns its id and outbound queue.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::ConnectionLimit`] when the server is full.
    pub fn register_session(&self) -> ServerResult<(Uuid, mpsc::Receiver<Frame>)> {
        let mut sessions = self.sessions.write();
        if sessions.len() >= self.config.max_connections {
            return Err(ServerError::ConnectionLimit(self.config.max_connections));
        }
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.config.session_buffer.max(1));
        sessions.insert(id, tx);
        debug!(session = %id, sessions = sessions.len(), "Session registered");
        Ok((id, rx))
    }

    /// Removes a session.
    pub fn remove_session(&self, id: Uuid) -> bool {
        let removed = self.sessions.write().remove(&id).is_some();
        if removed {
            debug!(session = %id, "Session removed");
        }
        removed
    }

    /// Returns the number of connected sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns the number of events accepted for relay.
    pub fn relayed_count(&self) -> u64 {
        self.relayed.load(Ordering::Relaxed)
    }

    /// Returns the number of deliveries dropped because a session was slow.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Validates inbound lines and fans them out.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles one line received from session `from`.
    ///
    /// The line must be a `refresh:*` event. It is re-encoded and queued
    /// for every session except the sender. Table names are not checked
    /// here; each receiver validates against its own allow-list.
    ///
    /// Returns the number of sessions the event was queued for.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Protocol`] if the line is not a refresh event.
    pub fn handle_line(&self, from: Uuid, line: &str) -> ServerResult<usize> {
        let event: NetworkEvent = decode_line(line)?;
        event.validate()?;
        let frame: Frame = encode_line(&event)?.into();

        let targets: Vec<(Uuid, mpsc::Sender<Frame>)> = self
            .context
            .sessions
            .read()
            .iter()
            .filter(|(id, _)| **id != from)
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut queued = 0;
        for (id, tx) in targets {
            match tx.try_send(Arc::clone(&frame)) {
                Ok(()) => queued += 1,
                Err(TrySendError::Full(_)) => {
                    self.context.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!(session = %id, event = %event.event, "Session queue full, event dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    trace!(session = %id, "Session closing, event skipped");
                }
            }
        }

        self.context.relayed.fetch_add(1, Ordering::Relaxed);
        trace!(
            from = %from,
            event = %event.event,
            table = %event.table,
            queued,
            "Relayed event"
        );
        Ok(queued)
    }
}
