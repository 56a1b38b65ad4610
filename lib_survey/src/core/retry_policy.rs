//! Retry policies shared by the connection manager and the survey writer.

use std::time::Duration;

use crate::connections::store::StoreError;

/// Decides whether a failed operation is attempted again and how long to wait.
///
/// `attempt` is the 1-based number of the attempt that just failed.
pub trait RetryPolicy: Send + Sync {
    fn should_retry(&self, attempt: u32, error: &StoreError) -> bool;
    fn delay_for(&self, attempt: u32) -> Duration;
}

/// A constant delay between attempts, optionally capped in attempt count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay {
    delay: Duration,
    max_attempts: Option<u32>,
}

impl FixedDelay {
    /// Never gives up.
    pub fn unbounded(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    /// Allows at most `max_attempts` attempts in total.
    pub fn bounded(max_attempts: u32, delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: Some(max_attempts),
        }
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }
}

impl RetryPolicy for FixedDelay {
    fn should_retry(&self, attempt: u32, _error: &StoreError) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }

    fn delay_for(&self, _attempt: u32) -> Duration {
        self.delay
    }
}
