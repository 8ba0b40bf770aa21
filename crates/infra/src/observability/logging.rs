//! `tracing` subscriber setup.

use metricflow_domain::{LoggingOptions, MetricsError, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Builds the filter: `RUST_LOG` when set and valid, otherwise
/// `options.level`.
///
/// # Errors
/// Returns `MetricsError::Config` if `options.level` is not a valid directive.
pub fn build_filter(options: &LoggingOptions) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&options.level).map_err(|e| {
        MetricsError::Config(format!("Invalid logging.level '{}': {e}", options.level))
    })
}

/// Install the global subscriber
///
/// Human-readable output by default, JSON lines when `options.json` is set.
///
/// # Returns
/// `Ok(true)` if the subscriber was installed, `Ok(false)` if another global
/// subscriber was already set (the existing one is kept).
///
/// # Errors
/// Returns `MetricsError::Config` if the level directive is invalid.
pub fn init_logging(options: &LoggingOptions) -> Result<bool> {
    let filter = build_filter(options)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if options.json {
        registry.with(fmt::layer().json().with_target(true).with_current_span(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    Ok(installed.is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_rejected() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let options = LoggingOptions { level: "metricflow=loud".to_string(), json: false };
        assert!(matches!(build_filter(&options), Err(MetricsError::Config(_))));
    }

    #[test]
    fn test_second_init_keeps_existing_subscriber() {
        let options = LoggingOptions { level: "warn".to_string(), json: true };
        let _ = init_logging(&options).unwrap();
        assert!(!init_logging(&options).unwrap());
    }
}
