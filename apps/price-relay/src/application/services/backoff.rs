//! Backoff Policy
//!
//! Capped exponential backoff shared by fetch retries and realtime
//! reconnection.
//!
//! The delay before retry `n` (0-based) is `min(base * multiplier^n, max)`,
//! optionally spread by a symmetric jitter. With the retry defaults this is
//! 1s, 2s, 4s, ... capped at 10s.

use std::time::Duration;

use rand::Rng;

/// Backoff parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Retries allowed after the first attempt. `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::retry(2, Duration::from_secs(1), Duration::from_secs(10))
    }
}

impl BackoffConfig {
    /// Deterministic retry schedule: doubling, no jitter, bounded retries.
    #[must_use]
    pub const fn retry(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_retries: Some(max_retries),
        }
    }

    /// Reconnection schedule: doubling with ±10% jitter, unlimited retries.
    #[must_use]
    pub const fn reconnect(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            multiplier: 2.0,
            jitter_factor: 0.1,
            max_retries: None,
        }
    }

    /// Un-jittered delay before retry `attempt` (0-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        #[allow(clippy::cast_precision_loss)]
        let scaled = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        #[allow(clippy::cast_precision_loss)]
        let cap = self.max_delay.as_millis() as f64;

        let millis = if scaled.is_finite() { scaled.min(cap) } else { cap };
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let millis = millis.max(0.0).round() as u64;
        Duration::from_millis(millis)
    }
}

/// Stateful backoff iterator over a [`BackoffConfig`].
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use price_relay::application::services::backoff::{BackoffConfig, BackoffPolicy};
///
/// let mut policy = BackoffPolicy::new(BackoffConfig::default());
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(2)));
/// assert_eq!(policy.next_delay(), None);
/// ```
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    config: BackoffConfig,
    attempt_count: u32,
}

impl BackoffPolicy {
    /// Create a policy at attempt zero.
    #[must_use]
    pub const fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Delay before the next retry, or `None` once retries are exhausted.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        let delay = self.config.delay_for(self.attempt_count);
        self.attempt_count = self.attempt_count.saturating_add(1);
        Some(self.apply_jitter(delay))
    }

    /// Start over after a success.
    pub const fn reset(&mut self) {
        self.attempt_count = 0;
    }

    /// Retries handed out so far.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Whether another retry is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        match self.config.max_retries {
            Some(max) => self.attempt_count < max,
            None => true,
        }
    }

    fn apply_jitter(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return delay;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = delay.as_millis() as f64;
        let range = base_millis * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-range..=range);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted = (base_millis + jitter).max(1.0) as u64;
        Duration::from_millis(adjusted)
    }
}
