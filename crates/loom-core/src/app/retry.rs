//! Retry policy: decides backoff delays and per-attempt time limits for
//! delegate calls.

use std::time::Duration;

use crate::config::RetryConfig;
use crate::domain::errors::DelegateFailureKind;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total tries, first one included.
    pub max_attempts: u32,

    /// Base delay for the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound for any single delay.
    pub max_delay: Duration,

    /// Time limit for one attempt.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: cfg.base_delay(),
            multiplier: cfg.multiplier,
            max_delay: cfg.max_delay(),
            timeout: cfg.timeout(),
        }
    }

    /// Single attempt, no waiting. Useful in tests.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Delay before the next try, after `attempts` failed tries (1-indexed).
    ///
    /// `base_delay * multiplier^(attempts - 1)`, capped at `max_delay`.
    /// With base=2s, multiplier=2.0: 2s, 4s, 8s, ...
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = base_secs * self.multiplier.powi(exponent);
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_secs)
    }

    /// Whether a failure after `attempts` tries should be retried.
    pub fn should_retry(&self, kind: DelegateFailureKind, attempts: u32) -> bool {
        kind.is_retryable() && attempts < self.max_attempts
    }
}
