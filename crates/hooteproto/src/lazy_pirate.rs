//! Lazy Pirate pattern abstraction for reliable ZMQ request-reply.
//!
//! From zguide Chapter 4: The Lazy Pirate pattern handles unreliable servers by:
//! - Retrying requests on timeout
//! - Capping backoff to prevent hours-long retry delays
//!
//! This module provides the bounded-retry configuration used by any DEALER
//! channel a job process dials out on (currently: the master reset
//! announcement in `remote-job`'s session driver).

use std::time::Duration;

/// Configuration for the Lazy Pirate retry loop: how long to wait per
/// attempt, how many attempts to make, and how the wait between attempts
/// grows.
#[derive(Debug, Clone)]
pub struct LazyPirateConfig {
    /// Timeout per request attempt.
    pub timeout: Duration,
    /// Maximum retry attempts before failing a request.
    pub max_retries: u32,
    /// Initial backoff between retries.
    pub backoff_base: Duration,
    /// Maximum backoff between retries (caps exponential growth).
    pub backoff_max: Duration,
}

impl Default for LazyPirateConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(5),
        }
    }
}

impl LazyPirateConfig {
    /// Calculate backoff delay for a given attempt number
    ///
    /// Uses exponential backoff capped at backoff_max:
    /// attempt 1: backoff_base
    /// attempt 2: backoff_base * 2
    /// attempt n: min(backoff_base * 2^(n-1), backoff_max)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
        let delay = self.backoff_base.saturating_mul(multiplier);
        std::cmp::min(delay, self.backoff_max)
    }
}
