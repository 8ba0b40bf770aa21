//! Resilience wiring for sink exports.

pub mod sink_breakers;

pub use sink_breakers::{SinkBreaker, SinkCircuitBreakerManager};

use std::time::Duration;

use metricflow_common::resilience::{ConfigResult, RetryPolicy};
use metricflow_domain::RetryOptions;

/// Builds the export retry policy; a disabled policy makes a single attempt.
pub fn retry_policy_from(options: &RetryOptions) -> ConfigResult<RetryPolicy> {
    if !options.enabled {
        return Ok(RetryPolicy::no_retry());
    }
    RetryPolicy::builder()
        .max_retries(options.max_retries)
        .initial_delay(Duration::from_millis(options.initial_delay_ms))
        .backoff_multiplier(options.backoff_multiplier)
        .jitter_percent(options.jitter_percent)
        .max_delay(Duration::from_millis(options.max_delay_ms))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_retry_makes_single_attempt() {
        let options = RetryOptions { enabled: false, ..RetryOptions::default() };
        let policy = retry_policy_from(&options).unwrap();
        assert_eq!(policy.max_retries, 0);
    }

    #[test]
    fn test_retry_options_carry_over() {
        let options =
            RetryOptions { max_retries: 5, initial_delay_ms: 250, ..RetryOptions::default() };
        let policy = retry_policy_from(&options).unwrap();
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_multiplier_rejected() {
        let options = RetryOptions { backoff_multiplier: 0.5, ..RetryOptions::default() };
        assert!(retry_policy_from(&options).is_err());
    }
}
