//! Retry with exponential backoff, percentage jitter, and cancellation.
//!
//! [`RetryPolicy::execute`] runs an operation once and then up to
//! `max_retries` more times. The delay before retry `n` (0-based) is
//! `initial_delay * backoff_multiplier^n`, capped at `max_delay` and then
//! randomized by `±jitter_percent`. Failures are never raised; the caller
//! gets a [`RetryOutcome`] with the value or the last error.
//!
//! Cancellation is checked before every attempt and raced against both the
//! running attempt and the backoff sleep, so a cancelled policy returns
//! promptly without starting another attempt.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use metricflow_common::resilience::RetryPolicy;
//! use tokio_util::sync::CancellationToken;
//!
//! # tokio_test::block_on(async {
//! let policy = RetryPolicy::builder()
//!     .max_retries(2)
//!     .initial_delay(Duration::from_millis(1))
//!     .build()
//!     .unwrap();
//! let outcome = policy
//!     .execute(|| async { Ok::<_, std::io::Error>(42) }, &CancellationToken::new())
//!     .await;
//! assert!(outcome.success);
//! assert_eq!(outcome.value, Some(42));
//! # });
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::circuit_breaker::{ConfigError, ConfigResult};

/// Error view of a finished [`RetryOutcome`].
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed; carries the last error.
    #[error("All retry attempts exhausted after {attempts} tries")]
    AttemptsExhausted {
        /// Total attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last_error: Option<E>,
    },

    /// The operation failed with an error the predicate refused to retry.
    #[error("Operation failed with non-retryable error")]
    NonRetryable {
        /// The refused error.
        source: E,
    },

    /// Cancellation was requested before the operation succeeded.
    #[error("Retry cancelled after {attempts} attempts")]
    Cancelled {
        /// Attempts started before cancellation.
        attempts: u32,
    },
}

/// Everything known about a finished retry sequence.
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    /// Whether an attempt succeeded.
    pub success: bool,
    /// Value of the successful attempt.
    pub value: Option<T>,
    /// Error of the most recent failed attempt.
    pub last_error: Option<E>,
    /// Attempts started, including the first.
    pub attempts: u32,
    /// Sum of backoff delays actually slept.
    pub total_delay: Duration,
    /// Whether the sequence ended because of cancellation.
    pub cancelled: bool,
    /// Whether the last error was refused by the retry predicate.
    pub non_retryable: bool,
}

impl<T, E> RetryOutcome<T, E> {
    fn succeeded(value: T, attempts: u32, total_delay: Duration) -> Self {
        Self {
            success: true,
            value: Some(value),
            last_error: None,
            attempts,
            total_delay,
            cancelled: false,
            non_retryable: false,
        }
    }

    fn failed(last_error: Option<E>, attempts: u32, total_delay: Duration) -> Self {
        Self {
            success: false,
            value: None,
            last_error,
            attempts,
            total_delay,
            cancelled: false,
            non_retryable: false,
        }
    }

    /// Converts into a plain `Result`.
    pub fn into_result(self) -> Result<T, RetryError<E>> {
        match self.value {
            Some(value) => Ok(value),
            None if self.cancelled => Err(RetryError::Cancelled { attempts: self.attempts }),
            None => match (self.non_retryable, self.last_error) {
                (true, Some(source)) => Err(RetryError::NonRetryable { source }),
                (_, last_error) => {
                    Err(RetryError::AttemptsExhausted { attempts: self.attempts, last_error })
                }
            },
        }
    }
}

/// Exponential backoff retry policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Growth factor applied per retry.
    pub backoff_multiplier: f64,
    /// Symmetric random spread applied to each delay, in percent.
    pub jitter_percent: f64,
    /// Upper bound for the un-jittered delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            jitter_percent: 10.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Starts a validating builder seeded with the defaults.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    /// A policy that runs the operation exactly once.
    pub fn no_retry() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }

    /// Checks that the parameters are usable.
    pub fn validate(&self) -> ConfigResult<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid {
                message: format!(
                    "backoff_multiplier must be >= 1.0, got {}",
                    self.backoff_multiplier
                ),
            });
        }
        if !(0.0..=100.0).contains(&self.jitter_percent) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "jitter_percent must be within 0..=100, got {}",
                    self.jitter_percent
                ),
            });
        }
        if self.max_delay < self.initial_delay {
            return Err(ConfigError::Invalid {
                message: "max_delay must not be smaller than initial_delay".to_string(),
            });
        }
        Ok(())
    }

    /// Un-jittered delay before retry `retry_index` (0-based).
    pub fn base_delay(&self, retry_index: u32) -> Duration {
        let exponent = i32::try_from(retry_index).unwrap_or(i32::MAX);
        let millis = self.initial_delay.as_secs_f64() * 1000.0
            * self.backoff_multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_secs_f64() * 1000.0);
        Duration::from_secs_f64(capped.max(0.0) / 1000.0)
    }

    /// Jittered delay before retry `retry_index` (0-based).
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        let base = self.base_delay(retry_index);
        if self.jitter_percent <= 0.0 || base.is_zero() {
            return base;
        }
        let spread = self.jitter_percent / 100.0;
        let factor = 1.0 + rand::thread_rng().gen_range(-spread..=spread);
        base.mul_f64(factor.max(0.0))
    }

    /// Runs `operation`, retrying every failure.
    pub async fn execute<F, Fut, T, E>(
        &self,
        operation: F,
        cancel: &CancellationToken,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.execute_if(operation, |_| true, cancel).await
    }

    /// Runs `operation`, retrying only failures accepted by `is_retryable`.
    pub async fn execute_if<F, Fut, T, E, P>(
        &self,
        mut operation: F,
        is_retryable: P,
        cancel: &CancellationToken,
    ) -> RetryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        let mut attempts = 0u32;
        let mut total_delay = Duration::ZERO;
        let mut last_error: Option<E> = None;

        loop {
            if cancel.is_cancelled() {
                return Self::cancelled(last_error, attempts, total_delay);
            }

            attempts += 1;
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Self::cancelled(last_error, attempts, total_delay);
                }
                result = operation() => result,
            };

            let error = match result {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(attempts, "operation succeeded after retry");
                    }
                    return RetryOutcome::succeeded(value, attempts, total_delay);
                }
                Err(error) => error,
            };

            if !is_retryable(&error) {
                debug!(attempts, error = %error, "error is not retryable");
                let mut outcome = RetryOutcome::failed(Some(error), attempts, total_delay);
                outcome.non_retryable = true;
                return outcome;
            }

            if attempts > self.max_retries {
                debug!(attempts, error = %error, "retry attempts exhausted");
                return RetryOutcome::failed(Some(error), attempts, total_delay);
            }

            let delay = self.delay_for(attempts - 1);
            trace!(attempt = attempts, ?delay, error = %error, "scheduling retry");
            last_error = Some(error);

            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Self::cancelled(last_error, attempts, total_delay);
                }
                () = tokio::time::sleep(delay) => {}
            }
            total_delay += delay;
        }
    }

    fn cancelled<T, E>(
        last_error: Option<E>,
        attempts: u32,
        total_delay: Duration,
    ) -> RetryOutcome<T, E> {
        debug!(attempts, "retry cancelled");
        let mut outcome = RetryOutcome::failed(last_error, attempts, total_delay);
        outcome.cancelled = true;
        outcome
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Default)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Retries after the first attempt.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    /// Delay before the first retry.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    /// Growth factor per retry.
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.policy.backoff_multiplier = multiplier;
        self
    }

    /// Random spread in percent.
    pub fn jitter_percent(mut self, percent: f64) -> Self {
        self.policy.jitter_percent = percent;
        self
    }

    /// Cap for the un-jittered delay.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Validates and returns the policy.
    pub fn build(self) -> ConfigResult<RetryPolicy> {
        self.policy.validate()?;
        Ok(self.policy)
    }
}
