//! Sink adapters that turn registry snapshots into backend wire formats.
//!
//! Every adapter implements [`MetricsSink`] and is driven only by the flush
//! scheduler and the dead-letter reprocessor:
//!
//! | sink | name | transport |
//! |---|---|---|
//! | [`PrometheusSink`] | `Prometheus` | pull, text exposition served over HTTP |
//! | [`OtlpSink`] | `OpenTelemetry` | OTLP/HTTP JSON, optional gzip |
//! | [`StatsdSink`] | `StatsD` | DogStatsD lines over UDP |
//! | [`KafkaSink`] | `Kafka` | JSON messages via a [`MessageProducer`] |
//! | [`InfluxSink`] | `InfluxDB` | line protocol over HTTP |

pub mod influx;
pub mod kafka;
pub mod otlp;
pub mod prometheus;
pub mod statsd;

use std::sync::Arc;

pub use influx::InfluxSink;
pub use kafka::{KafkaMessage, KafkaSink, LoggingProducer, MessageProducer};
use metricflow_core::MetricsSink;
use metricflow_domain::{MetricsOptions, Result};
pub use otlp::OtlpSink;
pub use prometheus::PrometheusSink;
pub use statsd::StatsdSink;
use tracing::info;

/// Builds every sink enabled in `options`.
///
/// Kafka is wired to the [`LoggingProducer`]; use [`KafkaSink::new`] directly
/// to plug in a real producer.
///
/// # Errors
///
/// Returns `MetricsError::Config` if an enabled sink has an unusable
/// endpoint or its HTTP client cannot be built.
pub fn build_sinks(options: &MetricsOptions) -> Result<Vec<Arc<dyn MetricsSink>>> {
    let mut sinks: Vec<Arc<dyn MetricsSink>> = Vec::new();

    if options.prometheus.enabled {
        sinks.push(Arc::new(PrometheusSink::new(options.prometheus.clone())));
    }
    if options.otlp.enabled {
        sinks.push(Arc::new(OtlpSink::new(
            options.otlp.clone(),
            &options.service_name,
            &options.environment,
        )?));
    }
    if options.statsd.enabled {
        sinks.push(Arc::new(StatsdSink::new(options.statsd.clone())));
    }
    if options.kafka.enabled {
        sinks.push(Arc::new(KafkaSink::new(
            options.kafka.clone(),
            &options.service_name,
            Arc::new(LoggingProducer),
        )));
    }
    if options.influxdb.enabled {
        sinks.push(Arc::new(InfluxSink::new(options.influxdb.clone())?));
    }

    info!(
        sinks = ?sinks.iter().map(|s| s.name().to_string()).collect::<Vec<_>>(),
        "built metric sinks"
    );
    Ok(sinks)
}

/// Renders a sample value the way text protocols expect.
pub(crate) fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "+Inf" } else { "-Inf" }.to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(7.0), "7");
        assert_eq!(format_value(0.25), "0.25");
        assert_eq!(format_value(f64::INFINITY), "+Inf");
        assert_eq!(format_value(f64::NEG_INFINITY), "-Inf");
        assert_eq!(format_value(f64::NAN), "NaN");
    }

    #[test]
    fn test_build_sinks_respects_enabled_flags() {
        let mut options = MetricsOptions::default();
        options.prometheus.enabled = true;
        options.statsd.enabled = true;
        options.kafka.enabled = true;

        let sinks = build_sinks(&options).unwrap();
        let names: Vec<&str> = sinks.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["Prometheus", "StatsD", "Kafka"]);
    }

    #[test]
    fn test_build_sinks_rejects_bad_endpoint() {
        let mut options = MetricsOptions::default();
        options.otlp.enabled = true;
        options.otlp.endpoint = "not a url".to_string();

        assert!(build_sinks(&options).is_err());
    }
}
