//! Connection task of the network channel.

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::transport::{ClientStats, NetworkTransport};
use livestore_core::{NotificationBus, Table};
use livestore_sync_protocol::{decode_line, read_frame, NetworkEvent};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// State of the link to the coordination server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// First connection attempt in progress.
    Connecting,
    /// Connected; local publishes are forwarded.
    Connected,
    /// Connection lost, retrying with backoff.
    Reconnecting,
    /// Retry budget exhausted; the channel is down for good.
    GaveUp {
        /// Consecutive failed attempts.
        attempts: u32,
    },
}

/// The network channel of one notification bus.
///
/// Starting a client attaches a [`NetworkTransport`] to the bus and spawns a
/// task that owns the socket:
/// - Local publishes go out as `refresh:data` (plus a domain event for
///   high-frequency tables)
/// - Events relayed by the server are delivered to local listeners only,
///   never re-broadcast
/// - A lost connection is retried with exponential backoff
///
/// Dropping the client detaches the transport and stops the task.
///
/// # Example
///
/// ```rust,ignore
/// use livestore_sync_client::{ClientConfig, NetworkClient};
///
/// let client = NetworkClient::start(ClientConfig::new("127.0.0.1:4870"), engine.bus());
/// ```
#[must_use = "dropping a NetworkClient disconnects immediately"]
pub struct NetworkClient {
    bus: Weak<NotificationBus>,
    transport: u64,
    state: watch::Receiver<LinkState>,
    stats: Arc<ClientStats>,
    task: JoinHandle<()>,
}

impl NetworkClient {
    /// Starts the network channel for `bus`.
    ///
    /// Returns immediately; connecting happens in the background. Must be
    /// called from within a Tokio runtime.
    pub fn start(config: ClientConfig, bus: &Arc<NotificationBus>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_buffer.max(1));
        let (state_tx, state_rx) = watch::channel(LinkState::Connecting);
        let stats = Arc::new(ClientStats::default());

        let transport = bus.attach(Arc::new(NetworkTransport::new(
            outbound_tx,
            state_rx.clone(),
            config.domain_events,
            Arc::clone(&stats),
        )));

        let task = tokio::spawn(run(
            config,
            outbound_rx,
            state_tx,
            Arc::downgrade(bus),
            Arc::clone(&stats),
        ));

        Self {
            bus: Arc::downgrade(bus),
            transport,
            state: state_rx,
            stats,
            task,
        }
    }

    /// Returns the current link state.
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Returns true if connected to the server.
    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Returns the client counters.
    pub fn stats(&self) -> &ClientStats {
        &self.stats
    }

    /// Waits until the link is up.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Timeout`] if `timeout` elapses first, or
    /// [`ClientError::GaveUp`] if the client stopped retrying.
    pub async fn wait_connected(&self, timeout: Duration) -> ClientResult<()> {
        let mut state = self.state.clone();
        let reached = tokio::time::timeout(
            timeout,
            state.wait_for(|s| matches!(s, LinkState::Connected | LinkState::GaveUp { .. })),
        )
        .await;

        match reached {
            Err(_) => Err(ClientError::Timeout),
            Ok(Err(_)) => Err(ClientError::Closed),
            Ok(Ok(state)) => match *state {
                LinkState::GaveUp { attempts } => Err(ClientError::GaveUp { attempts }),
                _ => Ok(()),
            },
        }
    }

    /// Disconnects and detaches the transport from the bus.
    pub fn detach(self) {}
}

impl Drop for NetworkClient {
    fn drop(&mut self) {
        self.task.abort();
        if let Some(bus) = self.bus.upgrade() {
            bus.detach(self.transport);
        }
    }
}

enum SessionEnd {
    ServerClosed,
    Detached,
}

async fn run(
    config: ClientConfig,
    mut outbound: mpsc::Receiver<String>,
    state: watch::Sender<LinkState>,
    bus: Weak<NotificationBus>,
    stats: Arc<ClientStats>,
) {
    let mut failures: u32 = 0;
    let mut connected_before = false;

    loop {
        match connect(&config).await {
            Ok(stream) => {
                failures = 0;
                if connected_before {
                    stats.record_reconnect();
                }
                connected_before = true;
                state.send_replace(LinkState::Connected);
                info!(server = %config.server_addr, "Connected to coordination server");

                let end = session(stream, &mut outbound, &bus, &stats).await;
                state.send_replace(LinkState::Reconnecting);
                match end {
                    Ok(SessionEnd::Detached) => return,
                    Ok(SessionEnd::ServerClosed) => {
                        info!(server = %config.server_addr, "Coordination server closed the connection");
                    }
                    Err(e) => {
                        warn!(server = %config.server_addr, error = %e, "Lost connection to coordination server");
                    }
                }
                if bus.strong_count() == 0 {
                    return;
                }
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                if !e.is_retryable() || config.retry.exhausted(failures) {
                    warn!(
                        server = %config.server_addr,
                        attempts = failures,
                        error = %e,
                        "Giving up on coordination server"
                    );
                    state.send_replace(LinkState::GaveUp { attempts: failures });
                    return;
                }
                debug!(server = %config.server_addr, attempt = failures, error = %e, "Could not reach coordination server");
            }
        }

        tokio::time::sleep(config.retry.delay_for_attempt(failures.max(1))).await;
    }
}

async fn connect(config: &ClientConfig) -> ClientResult<TcpStream> {
    match tokio::time::timeout(
        config.connect_timeout,
        TcpStream::connect(config.server_addr.as_str()),
    )
    .await
    {
        Ok(Ok(stream)) => {
            stream.set_nodelay(true)?;
            Ok(stream)
        }
        Ok(Err(e)) => Err(ClientError::from_connect(&e)),
        Err(_) => Err(ClientError::Timeout),
    }
}

async fn session(
    stream: TcpStream,
    outbound: &mut mpsc::Receiver<String>,
    bus: &Weak<NotificationBus>,
    stats: &ClientStats,
) -> ClientResult<SessionEnd> {
    let (read_half, write_half) = stream.into_split();
    tokio::select! {
        end = read_loop(read_half, bus, stats) => end,
        end = write_loop(write_half, outbound) => end,
    }
}

async fn read_loop(
    read_half: OwnedReadHalf,
    bus: &Weak<NotificationBus>,
    stats: &ClientStats,
) -> ClientResult<SessionEnd> {
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    loop {
        if read_frame(&mut reader, &mut line).await? == 0 {
            return Ok(SessionEnd::ServerClosed);
        }
        deliver_inbound(&line, bus, stats);
    }
}

async fn write_loop(
    mut write_half: OwnedWriteHalf,
    outbound: &mut mpsc::Receiver<String>,
) -> ClientResult<SessionEnd> {
    while let Some(line) = outbound.recv().await {
        write_half.write_all(line.as_bytes()).await?;
    }
    Ok(SessionEnd::Detached)
}

fn parse_inbound(line: &str) -> ClientResult<(NetworkEvent, Table)> {
    let event: NetworkEvent = decode_line(line)?;
    event.validate()?;
    let table: Table = event.table.parse()?;
    Ok((event, table))
}

fn deliver_inbound(line: &str, bus: &Weak<NotificationBus>, stats: &ClientStats) {
    let (event, table) = match parse_inbound(line) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!(error = %e, "Ignoring network event");
            return;
        }
    };
    let Some(bus) = bus.upgrade() else { return };

    stats.record_received();
    trace!(event = %event.event, %table, "Delivering network event");
    bus.deliver_local(table);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::transport::NETWORK_TRANSPORT;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_bus() -> (Arc<NotificationBus>, Arc<AtomicUsize>, livestore_core::Subscription) {
        let bus = Arc::new(NotificationBus::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let sub = bus.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        (bus, hits, sub)
    }

    #[test]
    fn inbound_events_deliver_locally() {
        let (bus, hits, _sub) = counting_bus();
        let stats = ClientStats::default();
        let weak = Arc::downgrade(&bus);

        deliver_inbound(r#"{"event":"refresh:data","table":"sessions"}"#, &weak, &stats);
        deliver_inbound(r#"{"event":"refresh:polls","table":"poll_votes"}"#, &weak, &stats);

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(stats.received(), 2);
        assert_eq!(bus.published_count(), 0);
    }

    #[test]
    fn inbound_garbage_is_ignored() {
        let (bus, hits, _sub) = counting_bus();
        let stats = ClientStats::default();
        let weak = Arc::downgrade(&bus);

        deliver_inbound("nope", &weak, &stats);
        deliver_inbound(r#"{"event":"chat:typing","table":"messages"}"#, &weak, &stats);
        deliver_inbound(r#"{"event":"refresh:data","table":"secrets"}"#, &weak, &stats);

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(stats.received(), 0);
    }

    fn fast_retry(attempts: u32) -> RetryConfig {
        RetryConfig::new(attempts)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false)
    }

    async fn closed_addr() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr.to_string()
    }

    #[tokio::test]
    async fn unreachable_server_gives_up() {
        let config = ClientConfig::new(closed_addr().await).with_retry(fast_retry(2));
        let bus = Arc::new(NotificationBus::new());
        let client = NetworkClient::start(config, &bus);

        let err = client
            .wait_connected(Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::GaveUp { attempts: 2 }));
        assert!(!client.is_connected());
    }

    #[test]
    fn inbound_errors_are_classified() {
        assert!(matches!(parse_inbound("nope"), Err(ClientError::Protocol(_))));
        assert!(matches!(
            parse_inbound(r#"{"event":"chat:typing","table":"messages"}"#),
            Err(ClientError::Protocol(_))
        ));
        assert!(matches!(
            parse_inbound(r#"{"event":"refresh:data","table":"secrets"}"#),
            Err(ClientError::Core(_))
        ));
        let (_, table) = parse_inbound(r#"{"event":"refresh:chat","table":"messages"}"#).unwrap();
        assert_eq!(table, Table::Messages);
    }

    #[tokio::test]
    async fn malformed_address_gives_up_at_once() {
        let config = ClientConfig::new("not-an-address").with_retry(RetryConfig::unlimited());
        let bus = Arc::new(NotificationBus::new());
        let client = NetworkClient::start(config, &bus);

        let err = client
            .wait_connected(Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::GaveUp { attempts: 1 }));
    }

    #[tokio::test]
    async fn drop_detaches_transport() {
        let bus = Arc::new(NotificationBus::new());
        let client = NetworkClient::start(ClientConfig::new(closed_addr().await), &bus);
        assert_eq!(bus.transport_names(), vec![NETWORK_TRANSPORT.to_string()]);

        client.detach();
        assert!(bus.transport_names().is_empty());
    }

    #[tokio::test]
    async fn dropping_one_client_keeps_the_other() {
        let bus = Arc::new(NotificationBus::new());
        let addr = closed_addr().await;
        let first = NetworkClient::start(ClientConfig::new(addr.clone()), &bus);
        let second = NetworkClient::start(ClientConfig::new(addr), &bus);
        assert_eq!(bus.transport_names().len(), 2);

        first.detach();
        assert_eq!(bus.transport_names(), vec![NETWORK_TRANSPORT.to_string()]);

        drop(second);
        assert!(bus.transport_names().is_empty());
    }
}
