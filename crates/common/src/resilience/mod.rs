//! Resilience primitives shared by the export pipeline.
//!
//! - **Circuit breaker**: consecutive-failure breaker with a single-probe
//!   half-open state.
//! - **Retry policy**: exponential backoff with percentage jitter that honors
//!   a [`CancellationToken`](tokio_util::sync::CancellationToken).
//! - **Clock**: time abstraction so cooldowns can be tested without sleeping.
//!
//! These types are generic over the operation's error type and know nothing
//! about metrics or sinks; the infra crate composes them per sink.

pub mod circuit_breaker;
pub mod clock;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerMetrics,
    CircuitState, ConfigError, ConfigResult, ResilienceError, ResilienceResult,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use retry::{RetryError, RetryOutcome, RetryPolicy, RetryPolicyBuilder};
