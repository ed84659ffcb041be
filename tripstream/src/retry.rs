//! Bounded retry with a fixed, cancellable delay between attempts.

use crate::config::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Outcome of a retried operation that did not succeed.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed; carries the last error seen.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    /// The cancellation token fired before an attempt succeeded.
    #[error("cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

/// Retry policy: up to `max_retries` attempts separated by `delay`.
///
/// Delays are raced against a [`CancellationToken`], so cancelling the token
/// stops the policy immediately and no further attempt is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_RETRIES,
            Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        )
    }
}

impl RetryPolicy {
    /// Creates a policy. At least one attempt is always made.
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            delay,
        }
    }

    /// Maximum number of attempts.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay between attempts.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Runs `operation` until it succeeds, attempts run out, or `cancel` fires.
    ///
    /// The closure receives the 1-based attempt number. Intermediate failures
    /// are logged; only the last one is returned.
    pub async fn run<T, E, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(RetryError::Cancelled { attempts: attempt - 1 });
                }
                result = operation(attempt) => result,
            };

            match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation = label, attempt, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(last) if attempt >= self.max_retries => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last,
                    });
                }
                Err(e) => {
                    warn!(
                        operation = label,
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "Attempt failed, retrying in {:?}",
                        self.delay
                    );
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(operation = label, attempt, "Retry cancelled during delay");
                    return Err(RetryError::Cancelled { attempts: attempt });
                }
                _ = tokio::time::sleep(self.delay) => {}
            }
            attempt += 1;
        }
    }
}
