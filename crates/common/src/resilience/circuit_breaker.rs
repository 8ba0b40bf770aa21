//! Circuit breaker with a single-probe half-open state.
//!
//! The breaker counts consecutive failures while [`CircuitState::Closed`].
//! Reaching the failure threshold opens it; while open every request is
//! short-circuited. Once the open duration has elapsed the next request is
//! admitted as the single half-open probe and all concurrent requests are
//! still rejected. The probe's outcome decides the next state: success closes
//! the breaker and clears the failure count, failure re-opens it and restarts
//! the cooldown.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use metricflow_common::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
//!
//! let config = CircuitBreakerConfig::builder()
//!     .failure_threshold(2)
//!     .open_duration(Duration::from_secs(30))
//!     .build()
//!     .unwrap();
//! let breaker = CircuitBreaker::new(config);
//!
//! breaker.record_failure();
//! breaker.record_failure();
//! assert_eq!(breaker.state(), CircuitState::Open);
//! assert!(!breaker.allow_request());
//! ```

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};

//==============================================================================
// Error Types
//==============================================================================

/// Invalid resilience configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A configuration value is out of range.
    #[error("Invalid configuration: {message}")]
    Invalid {
        /// What was wrong with the value.
        message: String,
    },
}

/// Configuration result type.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors produced when running an operation behind a breaker.
#[derive(Debug, Error)]
pub enum ResilienceError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// The breaker rejected the call without running it.
    #[error("Circuit breaker is open, rejecting calls")]
    CircuitOpen,

    /// The operation ran and failed.
    #[error("Operation failed: {source}")]
    OperationFailed {
        /// The operation's own error.
        #[source]
        source: E,
    },
}

/// Result type for breaker-guarded operations.
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;

//==============================================================================
// State and Configuration
//==============================================================================

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow normally; failures are counted.
    Closed,
    /// Requests are short-circuited until the cooldown elapses.
    Open,
    /// A single probe request is in flight or about to be admitted.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Breaker thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker.
    pub failure_threshold: u32,
    /// How long the breaker stays open before admitting a probe.
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, open_duration: Duration::from_secs(30) }
    }
}

impl CircuitBreakerConfig {
    /// Starts a validating builder seeded with the defaults.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::default()
    }

    /// Checks that the thresholds are usable.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "failure_threshold must be greater than 0".to_string(),
            });
        }
        if self.open_duration.is_zero() {
            return Err(ConfigError::Invalid {
                message: "open_duration must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    /// Consecutive failures that open the breaker.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Cooldown before a half-open probe is admitted.
    pub fn open_duration(mut self, duration: Duration) -> Self {
        self.config.open_duration = duration;
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Point-in-time view of a breaker for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerMetrics {
    /// Effective state at the time of the call.
    pub state: CircuitState,
    /// Current run of consecutive failures.
    pub consecutive_failures: u32,
    /// Requests admitted through the breaker.
    pub total_calls: u64,
    /// Requests rejected without running.
    pub total_rejections: u64,
    /// Recorded successes.
    pub total_successes: u64,
    /// Recorded failures.
    pub total_failures: u64,
}

//==============================================================================
// Circuit Breaker
//==============================================================================

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Consecutive-failure circuit breaker.
///
/// State transitions happen under one small mutex, so the half-open probe is
/// handed out to exactly one caller. Counters used only for reporting are
/// atomics outside the lock.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    clock: C,
    inner: Mutex<BreakerInner>,
    total_calls: AtomicU64,
    total_rejections: AtomicU64,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Creates a breaker driven by the system clock.
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Creates a breaker driven by `clock`.
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> Self {
        Self {
            config,
            clock,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
            total_calls: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
        }
    }

    /// The breaker's thresholds.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Asks for permission to run one request.
    ///
    /// Returns `true` when the caller may proceed; the caller must then report
    /// the outcome with [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure). An open breaker whose
    /// cooldown has elapsed moves to half-open here and grants the probe.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock();
        let allowed = match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if self.cooldown_elapsed(&inner) {
                    info!(
                        from = %CircuitState::Open,
                        to = %CircuitState::HalfOpen,
                        "circuit breaker admitting probe"
                    );
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        };
        drop(inner);

        if allowed {
            self.total_calls.fetch_add(1, Ordering::Relaxed);
        } else {
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
        }
        allowed
    }

    /// Records a successful request.
    pub fn record_success(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        inner.probe_in_flight = false;
        if inner.state != CircuitState::Closed {
            info!(from = %inner.state, to = %CircuitState::Closed, "circuit breaker closed");
            inner.state = CircuitState::Closed;
            inner.opened_at = None;
        }
    }

    /// Records a failed request.
    pub fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.probe_in_flight = false;
        match inner.state {
            CircuitState::HalfOpen => {
                warn!("circuit breaker probe failed, re-opening");
                self.trip(&mut inner);
            }
            CircuitState::Closed if inner.consecutive_failures >= self.config.failure_threshold => {
                warn!(
                    failures = inner.consecutive_failures,
                    threshold = self.config.failure_threshold,
                    "circuit breaker opened"
                );
                self.trip(&mut inner);
            }
            _ => {}
        }
    }

    /// Gives back a granted request whose outcome will never be known.
    ///
    /// Used when the caller abandons a request, e.g. on cancellation. If it
    /// held the half-open probe, the breaker returns to open with its original
    /// `opened_at`, so the cooldown stays elapsed and the next caller gets the
    /// probe. Neither success nor failure is counted.
    pub fn release_probe(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen && inner.probe_in_flight {
            debug!("circuit breaker probe abandoned, returning to open");
            inner.probe_in_flight = false;
            inner.state = CircuitState::Open;
        }
    }

    /// Runs `operation` behind the breaker and records its outcome.
    ///
    /// Dropping the returned future mid-call releases the probe instead of
    /// leaving the breaker half-open.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        if !self.allow_request() {
            debug!(state = %self.state(), "circuit breaker rejecting call");
            return Err(ResilienceError::CircuitOpen);
        }

        let permit = RequestPermit { breaker: self, armed: true };
        let result = operation().await;
        permit.disarm();

        match result {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                self.record_failure();
                Err(ResilienceError::OperationFailed { source: error })
            }
        }
    }

    /// Effective state.
    ///
    /// An open breaker whose cooldown has elapsed reports
    /// [`CircuitState::HalfOpen`] without consuming the probe.
    pub fn state(&self) -> CircuitState {
        let inner = self.inner.lock();
        if inner.state == CircuitState::Open && self.cooldown_elapsed(&inner) {
            CircuitState::HalfOpen
        } else {
            inner.state
        }
    }

    /// Current run of consecutive failures.
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Snapshot of state and counters.
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            state: self.state(),
            consecutive_failures: self.consecutive_failures(),
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
        }
    }

    /// Forces the breaker back to closed with a clean failure count.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    fn trip(&self, inner: &mut BreakerInner) {
        inner.state = CircuitState::Open;
        inner.opened_at = Some(self.clock.now());
    }

    fn cooldown_elapsed(&self, inner: &BreakerInner) -> bool {
        inner.opened_at.map_or(true, |opened| {
            self.clock.now().saturating_duration_since(opened) >= self.config.open_duration
        })
    }
}

/// Releases the breaker's probe if `execute` is dropped before the
/// operation finishes.
struct RequestPermit<'a, C: Clock> {
    breaker: &'a CircuitBreaker<C>,
    armed: bool,
}

impl<C: Clock> RequestPermit<'_, C> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<C: Clock> Drop for RequestPermit<'_, C> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.release_probe();
        }
    }
}
