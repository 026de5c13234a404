//! Retry policy for tile fetch attempts
//!
//! Converts per-attempt outcomes into a decision: retry the same source
//! after a delay, or give up and let the tile advance to its next
//! candidate source. Only transient failures are retried; authoritative
//! misses and invalid payloads advance immediately.

use rand::Rng;
use std::time::Duration;

/// Base delay for the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
/// Ceiling applied to every backoff delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Decision for a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the given duration, then retry the same source.
    RetryAfter(Duration),
    /// Stop trying this source.
    GiveUp,
}

/// Per-(source, tile) retry schedule with exponential backoff and full
/// jitter.
///
/// `max_retries` counts retries, not attempts: a tile sees at most
/// `max_retries + 1` attempts against one source.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy allowing up to `max_retries` retries per source.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    /// Overrides the first-retry delay.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Overrides the backoff ceiling.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Maximum number of retries per source.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Decides what to do after a transient failure on attempt
    /// `attempt` (1-based).
    pub fn on_transient(&self, attempt: u32) -> RetryDecision {
        if attempt > self.max_retries {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(self.backoff_delay(attempt))
    }

    /// Backoff before retrying after the given 1-based attempt:
    /// `base * 2^(attempt-1)` capped at the ceiling, with full jitter
    /// (a uniform draw from zero up to the capped value).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let uncapped = self.base_delay.saturating_mul(1u32 << exponent);
        let capped = uncapped.min(self.max_delay);
        if capped.is_zero() {
            return capped;
        }
        let jittered = rand::thread_rng().gen_range(0..=capped.as_millis() as u64);
        Duration::from_millis(jittered)
    }
}
