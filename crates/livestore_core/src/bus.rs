//! Change notification bus.
//!
//! The bus tells interested parties that a table's contents may have
//! changed. A notification is a pure invalidation hint: it names a table and
//! carries nothing else.
//!
//! # Channels
//!
//! - In-process listeners registered with [`NotificationBus::subscribe`]
//! - Any number of attached [`Transport`]s (cross-context, network, ...)
//!
//! A single change may reach a listener once per channel, so listeners must
//! tolerate duplicate delivery.
//!
//! # Usage
//!
//! ```rust
//! use livestore_core::{NotificationBus, Table};
//! use std::sync::Arc;
//!
//! let bus = Arc::new(NotificationBus::new());
//! let sub = bus.subscribe(|table| println!("{table} changed"));
//!
//! bus.publish(Table::Sessions);
//! sub.unsubscribe();
//! ```

use crate::table::Table;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::trace;

/// An in-process change listener.
pub type Listener = Arc<dyn Fn(Table) + Send + Sync>;

/// An outbound notification channel.
///
/// Transports are best-effort. A transport that is missing its medium
/// (no peer contexts, disconnected socket) drops the notification quietly
/// instead of failing the publish.
pub trait Transport: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Sends an invalidation for `table` to remote listeners.
    fn broadcast(&self, table: Table);

    /// Returns true if the transport can currently deliver.
    fn is_connected(&self) -> bool {
        true
    }
}

/// Fans table invalidations out to in-process listeners and transports.
///
/// The bus:
/// - Invokes listeners synchronously, in registration order
/// - Forwards every published table to each attached transport
/// - Never fails: missing transports degrade to in-process only
pub struct NotificationBus {
    listeners: RwLock<Vec<(u64, Listener)>>,
    transports: RwLock<Vec<(u64, Arc<dyn Transport>)>>,
    next_id: AtomicU64,
    published: AtomicU64,
}

impl NotificationBus {
    /// Creates a bus with no listeners and no transports.
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            transports: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            published: AtomicU64::new(0),
        }
    }

    /// Registers an in-process listener.
    ///
    /// The listener stays registered until the returned [`Subscription`] is
    /// unsubscribed or dropped.
    pub fn subscribe<F>(self: &Arc<Self>, listener: F) -> Subscription
    where
        F: Fn(Table) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.write().push((id, Arc::new(listener)));
        trace!(subscription = id, "Listener subscribed");
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    /// Publishes a local change on every channel.
    ///
    /// Call this only after the mutation is durable.
    pub fn publish(&self, table: Table) {
        self.published.fetch_add(1, Ordering::Relaxed);
        self.deliver_local(table);

        let transports: Vec<Arc<dyn Transport>> = self
            .transports
            .read()
            .iter()
            .map(|(_, t)| Arc::clone(t))
            .collect();
        for transport in transports {
            if transport.is_connected() {
                transport.broadcast(table);
            } else {
                trace!(transport = transport.name(), %table, "Transport down, skipped");
            }
        }
    }

    /// Notifies in-process listeners only.
    ///
    /// Inbound transports use this so a received notification is never sent
    /// back out.
    pub fn deliver_local(&self, table: Table) {
        // Snapshot so listeners may subscribe or unsubscribe while running.
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        trace!(%table, listeners = listeners.len(), "Delivering notification");
        for listener in listeners {
            listener(table);
        }
    }

    /// Attaches an outbound transport.
    ///
    /// Returns the id to pass to [`NotificationBus::detach`]. Several
    /// transports may share a name; each has its own id.
    pub fn attach(&self, transport: Arc<dyn Transport>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        trace!(transport = transport.name(), id, "Transport attached");
        self.transports.write().push((id, transport));
        id
    }

    /// Detaches the transport returned `id` by [`NotificationBus::attach`].
    ///
    /// Returns true if it was still attached.
    pub fn detach(&self, id: u64) -> bool {
        let mut transports = self.transports.write();
        let before = transports.len();
        transports.retain(|(tid, _)| *tid != id);
        transports.len() != before
    }

    /// Returns the names of attached transports.
    pub fn transport_names(&self) -> Vec<String> {
        self.transports
            .read()
            .iter()
            .map(|(_, t)| t.name().to_string())
            .collect()
    }

    /// Returns the number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Returns how many local changes have been published.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    fn unsubscribe(&self, id: u64) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a registered listener.
///
/// Dropping the handle unsubscribes the listener.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    bus: Weak<NotificationBus>,
    id: u64,
}

impl Subscription {
    /// Returns the listener id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Unsubscribes the listener.
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            if bus.unsubscribe(self.id) {
                trace!(subscription = self.id, "Listener unsubscribed");
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
