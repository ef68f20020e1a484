//! Periodic retry with a total time budget.
//!
//! Attempt `k` (0-based) is scheduled at `start + k * period` and is only made
//! while that instant is before `start + stop`. Given period P and stop S this
//! yields ⌈S/P⌉ attempts, and exhaustion is declared within one period of S.
//! An attempt still running at `start + stop` is abandoned, so a hung
//! operation cannot stretch the budget.
//! Decisions depend on elapsed time only; the attempt counter is for logging.

use super::errors::RetryError;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, warn};

/// Smallest usable period; a zero period would spin.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Retry schedule for broker connects and reconnects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    period: Duration,
    stop: Duration,
}

impl RetryPolicy {
    pub fn new(period: Duration, stop: Duration) -> Self {
        Self {
            period: period.max(MIN_PERIOD),
            stop,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn stop(&self) -> Duration {
        self.stop
    }

    /// Attempts made before exhaustion when every attempt fails instantly.
    /// Slow attempts only lower the count.
    pub fn max_attempts(&self) -> u32 {
        let p = self.period.as_nanos();
        let s = self.stop.as_nanos();
        let n = s.div_ceil(p).max(1);
        u32::try_from(n).unwrap_or(u32::MAX)
    }

    /// Run `op` until it succeeds or the budget is spent.
    pub async fn attempt<T, E, F, Fut>(&self, what: &'static str, op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.attempt_while(what, op, |_| true).await
    }

    /// Like [`attempt`](Self::attempt), but stops early on errors for which
    /// `retryable` returns false.
    pub async fn attempt_while<T, E, F, Fut, R>(
        &self,
        what: &'static str,
        mut op: F,
        mut retryable: R,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
        R: FnMut(&E) -> bool,
    {
        let start = Instant::now();
        let deadline = start + self.stop;
        let mut attempts: u32 = 0;

        loop {
            attempts = attempts.saturating_add(1);
            let Ok(outcome) = timeout_at(deadline, op()).await else {
                let elapsed = start.elapsed();
                warn!(
                    attempt = attempts,
                    max_attempts = self.max_attempts(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "{what} still pending when the retry budget of {:?} ran out",
                    self.stop
                );
                return Err(RetryError::DeadlineExceeded {
                    what,
                    attempts,
                    elapsed,
                });
            };
            let error = match outcome {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(
                            attempt = attempts,
                            elapsed_ms = start.elapsed().as_millis() as u64,
                            "{what} succeeded after retrying"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            let elapsed = start.elapsed();
            if !retryable(&error) {
                warn!(
                    attempt = attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %error,
                    "{what} failed permanently"
                );
                return Err(RetryError::Aborted {
                    what,
                    attempts,
                    error,
                });
            }

            let next_at = start + self.period.saturating_mul(attempts);
            if next_at >= deadline || Instant::now() >= deadline {
                warn!(
                    attempt = attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %error,
                    "{what} failed, retry budget of {:?} exhausted",
                    self.stop
                );
                return Err(RetryError::Exhausted {
                    what,
                    attempts,
                    elapsed,
                    last_error: error,
                });
            }

            warn!(
                attempt = attempts,
                max_attempts = self.max_attempts(),
                elapsed_ms = elapsed.as_millis() as u64,
                error = %error,
                "{what} failed, retrying in {:?}",
                self.period
            );
            sleep_until(next_at).await;
        }
    }
}
