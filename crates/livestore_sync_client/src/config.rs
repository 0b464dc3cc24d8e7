//! Configuration for the network channel.

use std::time::Duration;

/// Configuration for a network client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Coordination server address, as `host:port`.
    pub server_addr: String,
    /// Reconnect behavior.
    pub retry: RetryConfig,
    /// Timeout for one connection attempt.
    pub connect_timeout: Duration,
    /// Outbound events queued before new ones are dropped.
    pub outbound_buffer: usize,
    /// Whether to send the narrow `refresh:<domain>` event next to
    /// `refresh:data` for tables that belong to a domain.
    pub domain_events: bool,
}

impl ClientConfig {
    /// Creates a new client configuration.
    pub fn new(server_addr: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            retry: RetryConfig::unlimited(),
            connect_timeout: Duration::from_secs(5),
            outbound_buffer: 256,
            domain_events: true,
        }
    }

    /// Sets the reconnect configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the outbound queue length.
    pub fn with_outbound_buffer(mut self, size: usize) -> Self {
        self.outbound_buffer = size.max(1);
        self
    }

    /// Enables or disables domain events.
    pub fn with_domain_events(mut self, enabled: bool) -> Self {
        self.domain_events = enabled;
        self
    }
}

/// Configuration for reconnect behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of consecutive failed connection attempts before the
    /// client gives up. Zero means never give up.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration that keeps reconnecting forever.
    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// Creates a configuration with a single connection attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.add_jitter = enabled;
        self
    }

    /// Returns true once `failures` consecutive failures exhaust the budget.
    pub fn exhausted(&self, failures: u32) -> bool {
        self.max_attempts != 0 && failures >= self.max_attempts
    }

    /// Calculates the delay for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Add up to 25% jitter
            let jitter = delay_secs * 0.25 * rand_jitter();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// Cheap time-derived jitter in `[0, 1)`.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1000) / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_builder() {
        let config = ClientConfig::new("127.0.0.1:4870")
            .with_retry(RetryConfig::no_retry())
            .with_connect_timeout(Duration::from_secs(1))
            .with_outbound_buffer(0)
            .with_domain_events(false);

        assert_eq!(config.server_addr, "127.0.0.1:4870");
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.connect_timeout, Duration::from_secs(1));
        assert_eq!(config.outbound_buffer, 1);
        assert!(!config.domain_events);
    }

    #[test]
    fn retry_budget() {
        assert!(!RetryConfig::unlimited().exhausted(u32::MAX));
        assert!(RetryConfig::no_retry().exhausted(1));
        assert!(!RetryConfig::new(3).exhausted(2));
        assert!(RetryConfig::new(3).exhausted(3));
    }

    #[test]
    fn retry_delay_calculation() {
        let config = RetryConfig::new(5)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);

        let delay1 = config.delay_for_attempt(1);
        assert!(delay1 >= Duration::from_millis(100));
        assert!(delay1 <= Duration::from_millis(125));

        let delay2 = config.delay_for_attempt(2);
        assert!(delay2 >= Duration::from_millis(200));
    }

    #[test]
    fn retry_delay_respects_max() {
        let config = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0)
            .with_jitter(false);

        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(5));
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_secs(5));
    }
}
