//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Default port of the coordination server.
pub const DEFAULT_PORT: u16 = 4870;

/// Configuration for the coordination server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent sessions.
    pub max_connections: usize,
    /// Events queued per session before new ones are dropped for it.
    pub session_buffer: usize,
    /// Time allowed for writing one event to a session.
    pub write_timeout: Duration,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_connections: 1000,
            session_buffer: 256,
            write_timeout: Duration::from_secs(10),
        }
    }

    /// Sets the maximum concurrent sessions.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the per-session queue length.
    pub fn with_session_buffer(mut self, size: usize) -> Self {
        self.session_buffer = size.max(1);
        self
    }

    /// Sets the per-event write timeout.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new("0.0.0.0:9000".parse().unwrap())
            .with_max_connections(500)
            .with_session_buffer(0)
            .with_write_timeout(Duration::from_secs(1));

        assert_eq!(config.max_connections, 500);
        assert_eq!(config.session_buffer, 1);
        assert_eq!(config.write_timeout, Duration::from_secs(1));
    }
}
