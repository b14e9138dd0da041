use std::thread;
use std::time::Duration;

use crate::error::{FeederError, FeederResult};

/// Bounded exponential backoff for rate limits and transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1200),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based). `Retry-After` wins when present.
    pub fn delay_for(&self, attempt: u32, err: &FeederError) -> Duration {
        if let FeederError::RateLimited {
            retry_after_secs: Some(secs),
            ..
        } = err
        {
            return Duration::from_secs(*secs);
        }
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    pub fn run<T>(&self, label: &str, op: impl FnMut() -> FeederResult<T>) -> FeederResult<T> {
        self.run_while(label, FeederError::is_retryable, op)
    }

    /// For calls that are not safe to repeat (creates, appends).
    ///
    /// Only rate limits are retried: the server rejected those before
    /// applying anything. A transient failure may hide an applied write,
    /// so it surfaces instead of being sent again.
    pub fn run_unapplied<T>(
        &self,
        label: &str,
        op: impl FnMut() -> FeederResult<T>,
    ) -> FeederResult<T> {
        self.run_while(label, |err| matches!(err, FeederError::RateLimited { .. }), op)
    }

    fn run_while<T>(
        &self,
        label: &str,
        retry_if: impl Fn(&FeederError) -> bool,
        mut op: impl FnMut() -> FeederResult<T>,
    ) -> FeederResult<T> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if retry_if(&err) && attempt < attempts => {
                    let delay = self.delay_for(attempt, &err);
                    tracing::warn!(
                        call = label,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying remote call"
                    );
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
