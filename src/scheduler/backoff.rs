//! Failure backoff for the polling scheduler.

use std::time::Duration;

use crate::errors::{FetchError, RetryClass};

/// Tracks consecutive failures of one source and derives the next delay
///
/// The n-th consecutive transient failure waits `base * 2^(n-1)`, capped at
/// `base * max_factor`. A parse failure waits exactly `base` and leaves the streak
/// alone. Success resets to `base`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max_factor: u32,
    streak: u32,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max_factor: u32) -> Self {
        Self {
            base,
            max_factor: max_factor.max(1),
            streak: 0,
            current: base,
        }
    }

    /// Record a success and return the base delay
    pub fn reset(&mut self) -> Duration {
        self.streak = 0;
        self.current = self.base;
        self.current
    }

    /// Record a failure and return the delay before the next attempt
    pub fn on_failure(&mut self, error: &FetchError) -> Duration {
        self.current = match error.retry_class() {
            RetryClass::NormalInterval => self.base,
            RetryClass::Backoff => {
                self.streak = self.streak.saturating_add(1);
                let factor = 1u32
                    .checked_shl(self.streak - 1)
                    .unwrap_or(u32::MAX)
                    .min(self.max_factor);
                self.base.saturating_mul(factor)
            }
        };
        self.current
    }

    /// Consecutive transient failures since the last success
    pub fn streak(&self) -> u32 {
        self.streak
    }

    /// The most recently computed delay
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn base(&self) -> Duration {
        self.base
    }
}
