//! Exponential-backoff pacing for endpoint retries.
//!
//! When an invocation fails before the endpoint accepts it, the executor
//! waits out a backoff delay, asks the client to reconnect, and returns
//! the job to the router. Consecutive failures grow the delay; a
//! successful invocation resets it.

use std::time::Duration;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay between retries.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff delay from the current delay and policy.
///
/// The result is clamped to [`RetryPolicy::max_delay`].
pub fn next_delay(current: Duration, policy: &RetryPolicy) -> Duration {
    let next_ms = (current.as_millis() as f64 * policy.multiplier) as u64;
    Duration::from_millis(next_ms).min(policy.max_delay)
}

/// Mutable backoff state tracked across consecutive failures.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RetryPolicy,
    current: Duration,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        let current = policy.initial_delay;
        Self { policy, current }
    }

    /// The delay to wait before the next attempt. Grows the stored delay.
    pub fn next(&mut self) -> Duration {
        let delay = self.current;
        self.current = next_delay(delay, &self.policy);
        delay
    }

    /// Reset to the initial delay after a success.
    pub fn reset(&mut self) {
        self.current = self.policy.initial_delay;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
