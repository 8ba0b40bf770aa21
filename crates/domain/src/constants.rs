//! Engine constants
//!
//! Centralized defaults shared by the configuration model, the core
//! accumulators and the sink adapters.

// Bus
pub const DEFAULT_BUS_CAPACITY: usize = 10_000;
pub const BUS_SATURATION_PERCENT: f64 = 90.0;

// Scheduling
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_EXPORT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_DLQ_PROCESSING_INTERVAL_MS: u64 = 300_000;
pub const DLQ_ERROR_BACKOFF_MS: u64 = 30_000;

// Dead-letter queue
pub const DEFAULT_DLQ_MAX_SIZE: usize = 10_000;
pub const DEFAULT_DLQ_BATCH_SIZE: usize = 100;

// Accumulators
pub const DEFAULT_HISTOGRAM_BUCKETS: &[f64] =
    &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
pub const DEFAULT_SUMMARY_QUANTILES: &[f64] = &[0.5, 0.9, 0.95, 0.99];
pub const DEFAULT_SUMMARY_MAX_SAMPLES: usize = 1_000;
pub const DEFAULT_SLIDING_WINDOW_SECS: u64 = 300;
pub const DEFAULT_SLIDING_WINDOW_MAX_SAMPLES: usize = 10_000;
pub const DEFAULT_AGGREGATOR_MAX_SAMPLES: usize = 1_000;

// Sink names
pub const SINK_PROMETHEUS: &str = "Prometheus";
pub const SINK_OTLP: &str = "OpenTelemetry";
pub const SINK_STATSD: &str = "StatsD";
pub const SINK_KAFKA: &str = "Kafka";
pub const SINK_INFLUXDB: &str = "InfluxDB";

// Metadata keys written on dead-lettered records
pub const META_FAILED_AT: &str = "failed_at";
pub const META_ATTEMPTS: &str = "attempts";
pub const META_REASON: &str = "reason";
pub const META_REPROCESS_ATTEMPT: &str = "reprocess_attempt";
pub const META_LAST_REPROCESS_AT: &str = "last_reprocess_at";
pub const META_LAST_ERROR: &str = "last_error";
