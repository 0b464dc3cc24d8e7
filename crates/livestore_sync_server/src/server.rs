//! TCP front end of the coordination server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use livestore_sync_protocol::read_frame;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The coordination server.
///
/// Sessions connect over TCP and exchange newline-delimited JSON refresh
/// events. Every valid event a session sends is relayed to all other
/// sessions. The server keeps no data and no history: a session that is
/// offline when an event is relayed never sees it.
///
/// # Example
///
/// ```rust,ignore
/// use livestore_sync_server::{ServerConfig, SyncServer};
/// use std::sync::Arc;
///
/// let server = Arc::new(SyncServer::new(ServerConfig::default()));
/// let listener = server.bind().await?;
/// server.serve(listener, async { let _ = tokio::signal::ctrl_c().await; }).await?;
/// ```
pub struct SyncServer {
    handler: Arc<RequestHandler>,
    context: Arc<HandlerContext>,
}

impl SyncServer {
    /// Creates a new coordination server.
    pub fn new(config: ServerConfig) -> Self {
        let context = Arc::new(HandlerContext::new(config));
        let handler = Arc::new(RequestHandler::new(Arc::clone(&context)));
        Self { handler, context }
    }

    /// Binds the configured address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(&self) -> ServerResult<TcpListener> {
        Ok(TcpListener::bind(self.context.config.bind_addr).await?)
    }

    /// Accepts sessions on `listener` until `shutdown` completes.
    ///
    /// Open sessions are closed on shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener's address cannot be read.
    pub async fn serve<F>(self: Arc<Self>, listener: TcpListener, shutdown: F) -> ServerResult<()>
    where
        F: Future<Output = ()>,
    {
        let addr = listener.local_addr()?;
        info!(%addr, "Coordination server listening");

        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let server = Arc::clone(&self);
                        connections.spawn(async move { server.handle_connection(stream, peer).await });
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        info!(%addr, sessions = self.context.session_count(), "Coordination server stopping");
        connections.shutdown().await;
        Ok(())
    }

    /// Returns the number of connected sessions.
    pub fn session_count(&self) -> usize {
        self.context.session_count()
    }

    /// Returns the number of events relayed so far.
    pub fn relayed_count(&self) -> u64 {
        self.context.relayed_count()
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let (id, mut outbound) = match self.context.register_session() {
            Ok(session) => session,
            Err(e) => {
                log_session_error(None, peer, &e);
                return;
            }
        };
        debug!(session = %id, %peer, "Session connected");

        let (read_half, mut write_half) = stream.into_split();
        let write_timeout = self.context.config.write_timeout;
        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                match tokio::time::timeout(write_timeout, write_half.write_all(frame.as_bytes()))
                    .await
                {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(session = %id, error = %e, "Session write failed");
                        break;
                    }
                    Err(_) => {
                        debug!(session = %id, "Session write timed out");
                        break;
                    }
                }
            }
        });

        // Unregisters on every exit, including abort at shutdown.
        let _session = SessionGuard {
            context: &self.context,
            id,
            writer,
        };

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        loop {
            match read_frame(&mut reader, &mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    if let Err(e) = self.handler.handle_line(id, &line) {
                        log_session_error(Some(id), peer, &e);
                    }
                }
                Err(e) => {
                    log_session_error(Some(id), peer, &ServerError::from(e));
                    break;
                }
            }
        }

        debug!(session = %id, %peer, "Session disconnected");
    }
}

struct SessionGuard<'a> {
    context: &'a HandlerContext,
    id: Uuid,
    writer: JoinHandle<()>,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.writer.abort();
        self.context.remove_session(self.id);
    }
}

fn log_session_error(id: Option<Uuid>, peer: SocketAddr, error: &ServerError) {
    if error.is_client_error() {
        debug!(session = ?id, %peer, %error, "Session error");
    } else {
        warn!(session = ?id, %peer, %error, "Session error");
    }
}
