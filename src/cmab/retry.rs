use std::{future::Future, time::Duration};

use super::CmabError;
use crate::{Error, Result};

/// Retry policy for prediction requests.
///
/// Attempt `n` (0-based) that fails with a [retryable](CmabError::is_retryable) error is followed
/// by a delay of `backoff_base * backoff_multiplier^n`, capped at `max_timeout`. The whole
/// operation, including delays, is bounded by `max_timeout`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    max_retries: u32,
    backoff_base: Duration,
    backoff_multiplier: f64,
    max_timeout: Duration,
}

impl RetryConfig {
    /// Default value for [`RetryConfig::max_retries`].
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    /// Default value for [`RetryConfig::backoff_base`].
    pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(1000);
    /// Default value for [`RetryConfig::backoff_multiplier`].
    pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
    /// Default value for [`RetryConfig::max_timeout`].
    pub const DEFAULT_MAX_TIMEOUT: Duration = Duration::from_millis(10_000);

    /// Create a validated retry policy. `max_timeout` of zero disables the overall time limit.
    pub fn new(
        max_retries: u32,
        backoff_base: Duration,
        backoff_multiplier: f64,
        max_timeout: Duration,
    ) -> Result<RetryConfig> {
        if !backoff_multiplier.is_finite() || backoff_multiplier < 1.0 {
            return Err(Error::InvalidRetryConfig(
                "backoff multiplier must be a finite number not less than 1",
            ));
        }
        Ok(RetryConfig {
            max_retries,
            backoff_base,
            backoff_multiplier,
            max_timeout,
        })
    }

    /// Policy that makes a single attempt.
    pub fn no_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 0,
            ..RetryConfig::default()
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    pub fn max_timeout(&self) -> Duration {
        self.max_timeout
    }

    /// Delay after failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.backoff_base.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay = Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX);
        if self.max_timeout.is_zero() {
            delay
        } else {
            delay.min(self.max_timeout)
        }
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or runs out of
    /// attempts. `operation` receives the 0-based attempt number.
    pub async fn run<T, F, Fut>(&self, operation: F) -> std::result::Result<T, CmabError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, CmabError>>,
    {
        if self.max_timeout.is_zero() {
            return self.run_attempts(operation).await;
        }
        tokio::time::timeout(self.max_timeout, self.run_attempts(operation))
            .await
            .unwrap_or_else(|_| {
                log::warn!(target: "decision_core",
                           max_timeout_ms = self.max_timeout.as_millis() as u64;
                           "prediction request timed out");
                Err(CmabError::Timeout)
            })
    }

    async fn run_attempts<T, F, Fut>(&self, mut operation: F) -> std::result::Result<T, CmabError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, CmabError>>,
    {
        let mut attempt = 0;
        loop {
            let err = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => err,
            };

            if attempt >= self.max_retries {
                return Err(CmabError::RetriesExhausted {
                    attempts: attempt + 1,
                    last: Box::new(err),
                });
            }

            let delay = self.delay_for(attempt);
            log::warn!(target: "decision_core",
                       attempt,
                       delay_ms = delay.as_millis() as u64;
                       "prediction request failed, retrying: {err}");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl Default for RetryConfig {
    fn default() -> RetryConfig {
        RetryConfig {
            max_retries: RetryConfig::DEFAULT_MAX_RETRIES,
            backoff_base: RetryConfig::DEFAULT_BACKOFF_BASE,
            backoff_multiplier: RetryConfig::DEFAULT_BACKOFF_MULTIPLIER,
            max_timeout: RetryConfig::DEFAULT_MAX_TIMEOUT,
        }
    }
}
