//! Live query binding.

use crate::state::LiveState;
use livestore_core::{NotificationBus, Subscription, Table};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, trace};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;
type QueryFn<T> = Arc<dyn Fn() -> BoxFuture<Result<T, String>> + Send + Sync>;

const TRANSITION_BUFFER: usize = 64;

fn boxed<T, F, Fut, E>(query_fn: F) -> QueryFn<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: Display,
{
    Arc::new(move || {
        let fut = query_fn();
        Box::pin(async move { fut.await.map_err(|e| e.to_string()) })
    })
}

struct Slot<T> {
    state: LiveState<T>,
    /// Sequence number of the fetch whose result is shown.
    applied: u64,
}

struct Binding {
    watched: BTreeSet<Table>,
    key: Value,
    subscription: Option<Subscription>,
}

struct Inner<T> {
    bus: Arc<NotificationBus>,
    runtime: Handle,
    query: RwLock<QueryFn<T>>,
    slot: Mutex<Slot<T>>,
    binding: Mutex<Binding>,
    /// Bumped on rebind and detach; results from an older epoch are stale.
    epoch: AtomicU64,
    issued: AtomicU64,
    detached: AtomicBool,
    transitions: broadcast::Sender<LiveState<T>>,
}

impl<T> Inner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn spawn_fetch(self: &Arc<Self>) {
        if self.detached.load(Ordering::SeqCst) {
            return;
        }
        let seq = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let epoch = self.epoch.load(Ordering::SeqCst);
        let query = Arc::clone(&*self.query.read());
        let inner = Arc::clone(self);

        trace!(seq, epoch, "Live query fetch started");
        self.runtime.spawn(async move {
            let result = query().await;
            inner.complete(epoch, seq, result);
        });
    }

    fn complete(&self, epoch: u64, seq: u64, result: Result<T, String>) {
        let mut slot = self.slot.lock();
        if self.detached.load(Ordering::SeqCst)
            || self.epoch.load(Ordering::SeqCst) != epoch
            || seq <= slot.applied
        {
            trace!(seq, epoch, "Live query result discarded");
            return;
        }
        if let Err(message) = &result {
            debug!(seq, error = %message, "Live query fetch failed");
        }
        slot.applied = seq;
        slot.state.apply(result);
        // Nobody listening is fine.
        let _ = self.transitions.send(slot.state.clone());
    }

    fn subscribe(self: &Arc<Self>, watched: &BTreeSet<Table>) -> Subscription {
        let weak: Weak<Self> = Arc::downgrade(self);
        let watched = watched.clone();
        self.bus.subscribe(move |table| {
            if !watched.contains(&table) {
                return;
            }
            if let Some(inner) = weak.upgrade() {
                inner.spawn_fetch();
            }
        })
    }
}

/// A query bound to a set of watched tables.
///
/// The query runs once at creation and again, in the background, whenever
/// a watched table is reported changed or [`LiveQuery::refresh`] is called.
/// Notifications for other tables are ignored.
///
/// Results are applied in issue order: a fetch that completes after a newer
/// one has already been applied is discarded.
///
/// Dropping the binding detaches it.
pub struct LiveQuery<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Arc<Inner<T>>,
}

/// Binds `query_fn` to `watched` tables on `bus`.
///
/// `key` identifies the query's parameters; [`LiveQuery::rebind`] compares
/// it structurally to decide whether the query changed.
///
/// Must be called from within a Tokio runtime. Fetches run on that runtime
/// even when a notification arrives from another thread.
///
/// # Example
///
/// ```rust,ignore
/// let engine = Arc::clone(&engine);
/// let sessions = use_live_query(
///     engine.bus(),
///     move || {
///         let engine = Arc::clone(&engine);
///         async move { engine.find_all(Table::Sessions).await }
///     },
///     &[Table::Sessions, Table::Speakers],
///     json!({ "event": "rustconf" }),
/// );
///
/// let state = sessions.state();
/// ```
pub fn use_live_query<T, F, Fut, E>(
    bus: &Arc<NotificationBus>,
    query_fn: F,
    watched: &[Table],
    key: Value,
) -> LiveQuery<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: Display,
{
    let watched: BTreeSet<Table> = watched.iter().copied().collect();
    let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);

    let inner = Arc::new(Inner {
        bus: Arc::clone(bus),
        runtime: Handle::current(),
        query: RwLock::new(boxed(query_fn)),
        slot: Mutex::new(Slot {
            state: LiveState::initial(),
            applied: 0,
        }),
        binding: Mutex::new(Binding {
            watched: BTreeSet::new(),
            key,
            subscription: None,
        }),
        epoch: AtomicU64::new(0),
        issued: AtomicU64::new(0),
        detached: AtomicBool::new(false),
        transitions,
    });

    {
        let subscription = inner.subscribe(&watched);
        let mut binding = inner.binding.lock();
        binding.subscription = Some(subscription);
        binding.watched = watched;
    }
    inner.spawn_fetch();

    LiveQuery { inner }
}

impl<T> LiveQuery<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Returns a snapshot of the current state.
    pub fn state(&self) -> LiveState<T> {
        self.inner.slot.lock().state.clone()
    }

    /// Returns the last fetched data, if any.
    pub fn data(&self) -> Option<T> {
        self.inner.slot.lock().state.data.clone()
    }

    /// Returns a receiver of every state change after this call.
    pub fn transitions(&self) -> broadcast::Receiver<LiveState<T>> {
        self.inner.transitions.subscribe()
    }

    /// Refetches in the background. `is_loading` is not touched.
    pub fn refresh(&self) {
        self.inner.spawn_fetch();
    }

    /// Returns the watched tables.
    pub fn watched(&self) -> Vec<Table> {
        self.inner.binding.lock().watched.iter().copied().collect()
    }

    /// Returns true once the binding has been detached.
    pub fn is_detached(&self) -> bool {
        self.inner.detached.load(Ordering::SeqCst)
    }

    /// Replaces the query and its parameters.
    ///
    /// The new `query_fn` is always kept for later fetches. If `watched` (as a
    /// set) or `key` differ from the current binding, the binding moves to
    /// the new tables, results still in flight for the old parameters are
    /// discarded, and a background fetch starts. Returns true in that case.
    pub fn rebind<F, Fut, E>(&self, query_fn: F, watched: &[Table], key: Value) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Display,
    {
        let watched: BTreeSet<Table> = watched.iter().copied().collect();
        *self.inner.query.write() = boxed(query_fn);

        {
            let mut binding = self.inner.binding.lock();
            if self.is_detached() || (binding.watched == watched && binding.key == key) {
                return false;
            }

            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            binding.subscription = None;
            binding.subscription = Some(self.inner.subscribe(&watched));
            debug!(
                tables = ?watched,
                key = %key,
                "Live query rebound"
            );
            binding.watched = watched;
            binding.key = key;
        }

        self.inner.spawn_fetch();
        true
    }

    /// Stops listening and discards any result still in flight.
    pub fn detach(&self) {
        {
            let _slot = self.inner.slot.lock();
            if self.inner.detached.swap(true, Ordering::SeqCst) {
                return;
            }
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        }
        let subscription = self.inner.binding.lock().subscription.take();
        drop(subscription);
        trace!("Live query detached");
    }
}

impl<T> Drop for LiveQuery<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.detach();
    }
}
