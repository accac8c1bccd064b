//! Exponential backoff shared by the edge publisher and the batch writer.
//!
//! Retry behavior is modeled as an explicit state machine instead of nested
//! control flow so the transitions can be tested on their own: a component
//! is either `Idle` (last attempt succeeded) or in `Backoff` after some
//! number of consecutive failures.

use std::time::Duration;

/// Maximum exponent applied to the initial delay, to avoid shift overflow.
const MAX_BACKOFF_SHIFT: u32 = 10;

/// Backoff parameters: initial delay, doubling per attempt, capped delay,
/// and the attempt budget for bounded retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Ceiling for the computed delay.
    pub max_delay: Duration,

    /// Attempt budget for bounded retries (the publisher ignores this and
    /// retries indefinitely with a capped delay; the writer honors it).
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Calculate the backoff delay for a given consecutive-failure count.
    ///
    /// Uses exponential backoff with jitter:
    /// delay = min(initial * 2^failures + jitter, max_delay)
    pub fn delay_for(&self, failures: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;

        let exponential_ms = base_ms.saturating_mul(1 << failures.min(MAX_BACKOFF_SHIFT));

        // Add jitter (up to 25% of the delay)
        let jitter = rand::random::<u64>() % (exponential_ms / 4 + 1);

        Duration::from_millis(exponential_ms.saturating_add(jitter).min(max_ms))
    }
}

/// Where a retrying component currently is in its backoff cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Last attempt succeeded (or nothing attempted yet).
    Idle,

    /// In backoff after `failures` consecutive failed attempts.
    Backoff { failures: u32 },
}

impl RetryState {
    /// Record a successful attempt.
    pub fn succeed(&mut self) {
        *self = RetryState::Idle;
    }

    /// Record a failed attempt and return the delay to wait before the
    /// next one under `policy`.
    pub fn fail(&mut self, policy: &RetryPolicy) -> Duration {
        let failures = match *self {
            RetryState::Idle => 0,
            RetryState::Backoff { failures } => failures.saturating_add(1),
        };
        *self = RetryState::Backoff { failures };
        policy.delay_for(failures)
    }

    /// Number of consecutive failures recorded so far.
    pub fn failures(&self) -> u32 {
        match *self {
            RetryState::Idle => 0,
            RetryState::Backoff { failures } => failures + 1,
        }
    }
}
