//! Retry policy engine.
//!
//! Wraps an activity invocation in exponential backoff with a bounded number
//! of attempts. Waiting goes through a [`Sleeper`] so tests can observe the
//! schedule without sleeping.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::activities::ActivityError;

/// Exponential backoff policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the second attempt, in milliseconds.
    #[serde(default = "default_initial_interval")]
    pub initial_interval_ms: u64,

    /// Factor applied to the delay for every further attempt.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound for any single delay, in milliseconds.
    #[serde(default = "default_max_interval")]
    pub max_interval_ms: u64,

    /// Maximum number of attempts (including the first try).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_initial_interval() -> u64 {
    1_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_interval() -> u64 {
    60_000
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval_ms: default_initial_interval(),
            backoff_multiplier: default_backoff_multiplier(),
            max_interval_ms: default_max_interval(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Result of running an operation under a [`RetryPolicy`].
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// The successful value, or the error of the last attempt.
    pub result: Result<T, ActivityError>,

    /// Number of attempts made.
    pub attempts: u32,
}

impl RetryPolicy {
    /// Delay to wait before attempt `attempt` (1-indexed).
    ///
    /// The first attempt runs immediately; attempt n waits
    /// `min(initial * multiplier^(n-2), max)`. A multiplier below 1.0 (or NaN)
    /// is treated as 1.0 so delays never shrink.
    pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 || self.initial_interval_ms == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 2).unwrap_or(i32::MAX);
        let delay = self.initial_interval_ms as f64 * self.effective_multiplier().powi(exponent);
        let capped = delay.min(self.max_interval_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    fn effective_multiplier(&self) -> f64 {
        if self.backoff_multiplier.is_nan() {
            1.0
        } else {
            self.backoff_multiplier.max(1.0)
        }
    }

    /// Check if another attempt is allowed after `attempt` failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempt budget is spent.
    ///
    /// `operation` receives the 1-based attempt number. `observer` hears about
    /// every failed attempt before the backoff wait starts.
    pub async fn execute<T, F, Fut>(
        &self,
        sleeper: &dyn Sleeper,
        observer: &dyn RetryObserver,
        mut operation: F,
    ) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ActivityError>>,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(error) => {
                    let retry_in = (error.is_retryable() && self.should_retry(attempt))
                        .then(|| self.delay_before_attempt(attempt + 1));

                    observer.attempt_failed(attempt, &error, retry_in).await;

                    match retry_in {
                        Some(delay) => {
                            sleeper.sleep(delay).await;
                            attempt += 1;
                        }
                        None => {
                            return RetryOutcome {
                                result: Err(error),
                                attempts: attempt,
                            };
                        }
                    }
                }
            }
        }
    }
}

/// Waits between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Sleeper that records requested delays and returns immediately.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, in order.
    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(duration);
        tokio::task::yield_now().await;
    }
}

/// Hook invoked after every failed attempt.
#[async_trait]
pub trait RetryObserver: Send + Sync {
    /// `retry_in` is the scheduled delay, or None when the policy gives up.
    async fn attempt_failed(&self, attempt: u32, error: &ActivityError, retry_in: Option<Duration>);
}

/// Observer that ignores failures.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

#[async_trait]
impl RetryObserver for NoopObserver {
    async fn attempt_failed(&self, _: u32, _: &ActivityError, _: Option<Duration>) {}
}
