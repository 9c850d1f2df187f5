//! Bounded retry for storage I/O
//!
//! Exponential backoff with a hard attempt limit. Only errors that report
//! themselves retryable are tried again; corrupt data and access failures
//! surface on the first attempt.

use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use scriptorium_common::config::RetryConfig;
use scriptorium_common::errors::{AppError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_interval: Duration,
    max_interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_interval: Duration, max_interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_interval,
            max_interval: max_interval.max(initial_interval),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.initial_interval_ms),
            Duration::from_millis(config.max_interval_ms),
        )
    }

    /// Single attempt, no backoff
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Run `operation` until it succeeds, fails permanently or runs out of attempts
    pub async fn run<T, F, Fut>(&self, what: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_max_elapsed_time(None)
            .build();

        let max_attempts = self.max_attempts;
        let mut attempt = 0u32;

        retry(backoff, || {
            attempt += 1;
            let current = attempt;
            let fut = operation();
            async move {
                fut.await.map_err(|e: AppError| {
                    if e.is_retryable() && current < max_attempts {
                        warn!(
                            operation = what,
                            attempt = current,
                            max_attempts,
                            error = %e,
                            "Retrying after transient failure"
                        );
                        backoff::Error::transient(e)
                    } else {
                        backoff::Error::permanent(e)
                    }
                })
            }
        })
        .await
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
