//! Exponential backoff for rate-limited API calls.

use std::thread;
use std::time::Duration;

use tracing::warn;

use super::CommandError;

/// How often and how patiently to retry a rate-limited call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay: initial_delay.saturating_mul(16),
        }
    }

    /// Delay before retry `attempt` (0-indexed): doubles each time, capped.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op`, sleeping and retrying while it reports a rate limit.
    ///
    /// Non-rate-limit errors are returned immediately.
    pub fn run<T>(&self, mut op: impl FnMut() -> Result<T, CommandError>) -> Result<T, CommandError> {
        let mut attempt = 0;
        loop {
            match op() {
                Err(e) if e.is_rate_limited() && attempt < self.max_retries => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(attempt = attempt + 1, ?delay, "rate limited, backing off");
                    thread::sleep(delay);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
