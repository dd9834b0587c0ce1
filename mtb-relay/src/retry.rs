//! # Retry
//!
//! Bounded retry with exponential backoff for calls to external services.
use std::fmt::Display;
use std::future::Future;
use std::time;

use tracing::warn;

use crate::time::Sleeper;

#[derive(Clone, Debug, PartialEq)]
/// A retry policy for a single outbound call.
pub struct RetryPolicy {
    /// Total number of attempts, the first one included.
    pub max_attempts: u32,
    /// The backoff interval before the second attempt.
    pub initial_interval: time::Duration,
    /// Factor applied to the interval after every failed attempt.
    pub multiplier: f64,
    /// The maximum possible backoff between attempts.
    pub maximum_interval: Option<time::Duration>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_interval: time::Duration, multiplier: f64) -> Self {
        Self {
            max_attempts,
            initial_interval,
            multiplier,
            maximum_interval: None,
        }
    }

    pub fn maximum_interval(mut self, interval: time::Duration) -> Self {
        self.maximum_interval = Some(interval);
        self
    }

    /// Interval to wait after the given (1-based) failed attempt.
    pub fn retry_interval(&self, attempt: u32) -> time::Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let seconds =
            self.initial_interval.as_secs_f64() * self.multiplier.max(1.0).powi(exponent);

        // Clamp before converting, a Duration cannot hold every f64
        match self.maximum_interval {
            Some(max_interval) if seconds >= max_interval.as_secs_f64() => max_interval,
            Some(max_interval) => {
                time::Duration::try_from_secs_f64(seconds).unwrap_or(max_interval)
            }
            None => time::Duration::try_from_secs_f64(seconds).unwrap_or(time::Duration::MAX),
        }
    }

    /// Run `operation` until it succeeds, fails with an error `is_retryable`
    /// rejects, or `max_attempts` is used up. The operation receives the
    /// current attempt number, starting at 1.
    pub async fn run<T, E, F, Fut, R>(
        &self,
        sleeper: &(dyn Sleeper + Send + Sync),
        is_retryable: R,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: Display,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    warn!("request failed: {}. attempt {} of {}", error, attempt, self.max_attempts);

                    if attempt >= self.max_attempts || !is_retryable(&error) {
                        return Err(error);
                    }
                    sleeper.sleep(self.retry_interval(attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: time::Duration::from_millis(1000),
            multiplier: 1.25,
            maximum_interval: Some(time::Duration::from_secs(30)),
        }
    }
}
