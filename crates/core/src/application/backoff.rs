// Retry backoff policy for transient bridge failures

use std::time::Duration;

use crate::application::constants::{
    DEFAULT_BACKOFF_BASE_DELAY, DEFAULT_BACKOFF_FACTOR, DEFAULT_MAX_ATTEMPTS,
};

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the given backoff delay
    Retry(Duration),
    /// Do not retry, the attempt bound is exhausted
    GiveUp,
}

/// Bounded exponential backoff with deterministic jitter.
///
/// delay = base_delay * factor^(attempt-1) * (0.9..=1.1)
///
/// The jitter factor is derived from a caller-supplied seed rather than a
/// random source, so the same component retries on the same schedule in
/// every run while distinct components stay decorrelated.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base_delay: Duration,
    factor: f64,
    max_attempts: u32,
}

impl BackoffPolicy {
    /// Create a backoff policy
    ///
    /// # Arguments
    /// * `base_delay` - Delay before the first retry
    /// * `factor` - Exponential growth factor per attempt
    /// * `max_attempts` - Total attempts allowed (first try included)
    pub fn new(base_delay: Duration, factor: f64, max_attempts: u32) -> Self {
        Self {
            base_delay,
            factor,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide whether attempt number `attempt` (1-based count of tries
    /// already made) should be followed by another try.
    pub fn decide(&self, attempt: u32, seed: u64) -> RetryDecision {
        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }

        let raw_ms = self.base_delay.as_millis() as f64 * self.factor.powi(attempt as i32 - 1);

        // ±10% deterministic jitter, seeded per component
        let jitter_seed = seed.wrapping_mul(31).wrapping_add(attempt as u64);
        let jitter = 0.9 + ((jitter_seed % 21) as f64 / 100.0);

        RetryDecision::Retry(Duration::from_millis((raw_ms * jitter) as u64))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_BACKOFF_BASE_DELAY,
            DEFAULT_BACKOFF_FACTOR,
            DEFAULT_MAX_ATTEMPTS,
        )
    }
}

/// Deterministic jitter seed from a component name
pub fn seed_from(name: &str) -> u64 {
    name.chars().map(|c| c as u64).sum()
}
