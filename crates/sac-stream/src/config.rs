//! Session configuration.

use std::time::Duration;

use crate::{endpoint::Endpoint, reconnect::ReconnectPolicy};

/// Configuration for a stream session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Endpoint to subscribe to.
    pub endpoint: Endpoint,
    /// Reconnection policy.
    pub reconnect: ReconnectPolicy,
    /// Timeout for each connection attempt.
    pub connect_timeout: Duration,
}

impl SessionConfig {
    /// Create a configuration for the given endpoint with defaults:
    /// unlimited reconnects, 1s base delay doubling up to 60s, 10s
    /// connect timeout.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Replace the reconnect policy.
    #[must_use]
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Set the maximum reconnection attempts (`None` = unlimited).
    #[must_use]
    pub fn max_attempts(mut self, attempts: Option<u32>) -> Self {
        self.reconnect.max_attempts = attempts;
        self
    }

    /// Set the base reconnection delay.
    #[must_use]
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.reconnect.base_delay = delay;
        self
    }

    /// Set the maximum reconnection delay.
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.reconnect.max_delay = delay;
        self
    }

    /// Set the backoff multiplier (1.0 = fixed delay).
    #[must_use]
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.reconnect.backoff_multiplier = multiplier;
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.endpoint.url.is_empty() {
            return Err("Endpoint URL cannot be empty".to_string());
        }
        self.reconnect.validate()?;
        if self.connect_timeout.is_zero() {
            return Err("Connect timeout must be > 0".to_string());
        }
        Ok(())
    }
}
