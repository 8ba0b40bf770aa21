//! Conversions from infrastructure errors into domain and sink errors.

use std::time::Duration;

use metricflow_common::resilience::ConfigError;
use metricflow_core::SinkError;
use metricflow_domain::MetricsError;

use crate::scheduling::SchedulerError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub MetricsError);

impl From<InfraError> for MetricsError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<MetricsError> for InfraError {
    fn from(value: MetricsError) -> Self {
        Self(value)
    }
}

impl From<ConfigError> for InfraError {
    fn from(value: ConfigError) -> Self {
        Self(MetricsError::Config(value.to_string()))
    }
}

impl From<SinkError> for InfraError {
    fn from(value: SinkError) -> Self {
        Self(MetricsError::Sink(value.to_string()))
    }
}

impl From<SchedulerError> for InfraError {
    fn from(value: SchedulerError) -> Self {
        let err = match value {
            SchedulerError::AlreadyRunning | SchedulerError::NotRunning => {
                MetricsError::InvalidInput(value.to_string())
            }
            _ => MetricsError::Internal(value.to_string()),
        };
        Self(err)
    }
}

impl From<reqwest::Error> for InfraError {
    fn from(value: reqwest::Error) -> Self {
        Self(MetricsError::Config(format!("http client: {value}")))
    }
}

/// Maps a `reqwest` failure onto the sink error taxonomy.
///
/// Timeouts keep their own variant so the scheduler can tag dead letters
/// with the right reason; everything else is a transport failure.
pub fn http_error(err: &reqwest::Error, timeout: Duration) -> SinkError {
    if err.is_timeout() {
        return SinkError::Timeout(timeout);
    }
    if err.is_builder() {
        return SinkError::Unavailable(format!("invalid request: {err}"));
    }
    SinkError::Transport(err.to_string())
}
