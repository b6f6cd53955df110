//! Reconnect policy: backoff calculation and the retry/give-up decision.

use std::time::Duration;

use rand::Rng;

/// Outcome of consulting the policy after a failed or dropped
/// connection attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Re-open the transport after this delay.
    RetryAfter(Duration),
    /// Stop retrying; the session becomes terminally closed.
    GiveUp,
}

/// Reconnection policy shared by both transport variants.
///
/// The source system hardcoded an asymmetry here: the WebSocket session
/// manager gave up after 5 attempts while the watch-stream clients
/// retried forever on a fixed delay. Both behaviors are reachable via
/// `max_attempts`.
#[derive(Clone, Copy, Debug)]
pub struct ReconnectPolicy {
    /// Maximum number of consecutive failed connection attempts before
    /// giving up (`None` = retry forever).
    pub max_attempts: Option<u32>,
    /// Delay before the first reconnection attempt.
    pub base_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Backoff multiplier applied per attempt (1.0 = fixed delay).
    pub backoff_multiplier: f64,
    /// Random jitter factor (0.0-1.0) blended into each delay.
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: 0.0,
        }
    }
}

impl ReconnectPolicy {
    /// Fixed-delay policy with unlimited attempts (the watch-stream
    /// behavior).
    pub fn fixed(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            base_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            jitter: 0.0,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.base_delay.is_zero() {
            return Err("Base reconnect delay must be > 0".to_string());
        }
        if self.max_delay.is_zero() {
            return Err("Max reconnect delay must be > 0".to_string());
        }
        if self.max_delay < self.base_delay {
            return Err("Max reconnect delay must be >= base reconnect delay".to_string());
        }
        if self.backoff_multiplier < 1.0 || !self.backoff_multiplier.is_finite() {
            return Err("Backoff multiplier must be >= 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter) || !self.jitter.is_finite() {
            return Err("Jitter must be between 0.0 and 1.0".to_string());
        }
        Ok(())
    }

    /// Consult the policy after `failed_attempts` consecutive failed or
    /// dropped connection attempts (counted since the last successful
    /// open; always >= 1 when called).
    pub fn on_disconnect(&self, failed_attempts: u32) -> ReconnectDecision {
        if let Some(max) = self.max_attempts
            && failed_attempts >= max
        {
            return ReconnectDecision::GiveUp;
        }
        // The first retry gets the base delay.
        ReconnectDecision::RetryAfter(self.delay_for(failed_attempts.saturating_sub(1)))
    }

    /// Backoff delay for a zero-based attempt number, capped and
    /// optionally jittered.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64();
        let exponent = self.backoff_multiplier.powf(f64::from(attempt));
        let capped = (base * exponent).min(max);

        if self.jitter == 0.0 {
            return Duration::from_secs_f64(capped);
        }

        let mut rng = rand::rng();
        let randomized = rng.random_range(0.0..=capped);
        let blended = capped * (1.0 - self.jitter) + randomized * self.jitter;
        Duration::from_secs_f64(blended)
    }
}
