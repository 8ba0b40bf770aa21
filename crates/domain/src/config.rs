//! Configuration model
//!
//! Every section is `#[serde(default)]`, so a config file only needs to name
//! the values it changes. [`MetricsOptions::validate`] is run by the loader
//! after merging file and environment sources.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BUS_CAPACITY, DEFAULT_DLQ_BATCH_SIZE, DEFAULT_DLQ_MAX_SIZE,
    DEFAULT_DLQ_PROCESSING_INTERVAL_MS, DEFAULT_EXPORT_TIMEOUT_MS, DEFAULT_FLUSH_INTERVAL_MS,
};
use crate::errors::{MetricsError, Result};
use crate::types::OverflowPolicy;

/// Root configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsOptions {
    pub enabled: bool,
    pub service_name: String,
    pub environment: String,
    /// Tags merged under every recorded metric.
    pub global_tags: BTreeMap<String, String>,
    pub flush_interval_ms: u64,
    /// Upper bound for one sink export, retries included.
    pub export_timeout_ms: u64,
    pub bus: BusOptions,
    pub retry_policy: RetryOptions,
    pub circuit_breaker: CircuitBreakerOptions,
    pub dead_letter_queue: DeadLetterOptions,
    pub prometheus: PrometheusOptions,
    pub otlp: OtlpOptions,
    pub statsd: StatsdOptions,
    pub kafka: KafkaOptions,
    pub influxdb: InfluxOptions,
    pub logging: LoggingOptions,
}

impl Default for MetricsOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            service_name: "metricflow".to_string(),
            environment: "development".to_string(),
            global_tags: BTreeMap::new(),
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            export_timeout_ms: DEFAULT_EXPORT_TIMEOUT_MS,
            bus: BusOptions::default(),
            retry_policy: RetryOptions::default(),
            circuit_breaker: CircuitBreakerOptions::default(),
            dead_letter_queue: DeadLetterOptions::default(),
            prometheus: PrometheusOptions::default(),
            otlp: OtlpOptions::default(),
            statsd: StatsdOptions::default(),
            kafka: KafkaOptions::default(),
            influxdb: InfluxOptions::default(),
            logging: LoggingOptions::default(),
        }
    }
}

impl MetricsOptions {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn export_timeout(&self) -> Duration {
        Duration::from_millis(self.export_timeout_ms)
    }

    /// Rejects values the engine cannot run with.
    ///
    /// # Errors
    /// Returns `MetricsError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        fn invalid(message: impl Into<String>) -> Result<()> {
            Err(MetricsError::Config(message.into()))
        }

        if self.flush_interval_ms == 0 {
            return invalid("flush_interval_ms must be greater than 0");
        }
        if self.export_timeout_ms == 0 {
            return invalid("export_timeout_ms must be greater than 0");
        }
        if self.bus.capacity == 0 {
            return invalid("bus.capacity must be greater than 0");
        }
        if self.dead_letter_queue.max_size == 0 {
            return invalid("dead_letter_queue.max_size must be greater than 0");
        }
        if self.dead_letter_queue.batch_size == 0 {
            return invalid("dead_letter_queue.batch_size must be greater than 0");
        }
        if self.dead_letter_queue.processing_interval_ms == 0 {
            return invalid("dead_letter_queue.processing_interval_ms must be greater than 0");
        }
        let retry = &self.retry_policy;
        if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 1.0 {
            return invalid(format!(
                "retry_policy.backoff_multiplier must be >= 1.0, got {}",
                retry.backoff_multiplier
            ));
        }
        if !(0.0..=100.0).contains(&retry.jitter_percent) {
            return invalid(format!(
                "retry_policy.jitter_percent must be within 0..=100, got {}",
                retry.jitter_percent
            ));
        }
        let breaker = &self.circuit_breaker;
        if breaker.default.failure_threshold == 0 {
            return invalid("circuit_breaker.default.failure_threshold must be greater than 0");
        }
        if breaker.default.open_duration_seconds == 0 {
            return invalid("circuit_breaker.default.open_duration_seconds must be greater than 0");
        }
        for (sink, overrides) in &breaker.sinks {
            if overrides.failure_threshold == Some(0) {
                return invalid(format!(
                    "circuit_breaker.sinks.{sink}.failure_threshold must be greater than 0"
                ));
            }
            if overrides.open_duration_seconds == Some(0) {
                return invalid(format!(
                    "circuit_breaker.sinks.{sink}.open_duration_seconds must be greater than 0"
                ));
            }
        }
        if self.statsd.max_packet_size == 0 {
            return invalid("statsd.max_packet_size must be greater than 0");
        }
        if self.kafka.batch_size == 0 {
            return invalid("kafka.batch_size must be greater than 0");
        }
        Ok(())
    }
}

/// Metric bus sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusOptions {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self { capacity: DEFAULT_BUS_CAPACITY, overflow: OverflowPolicy::DropOldest }
    }
}

/// Export retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOptions {
    pub enabled: bool,
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_percent: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            initial_delay_ms: 100,
            backoff_multiplier: 2.0,
            jitter_percent: 10.0,
            max_delay_ms: 30_000,
        }
    }
}

/// Circuit breaker defaults and per-sink overrides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerOptions {
    /// When false every sink behaves as if its breaker were always closed.
    pub enabled: bool,
    pub default: BreakerThresholds,
    /// Keyed by sink name.
    pub sinks: HashMap<String, SinkBreakerOverride>,
}

impl Default for CircuitBreakerOptions {
    fn default() -> Self {
        Self { enabled: true, default: BreakerThresholds::default(), sinks: HashMap::new() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerThresholds {
    pub failure_threshold: u32,
    pub open_duration_seconds: u64,
}

impl Default for BreakerThresholds {
    fn default() -> Self {
        Self { failure_threshold: 5, open_duration_seconds: 30 }
    }
}

/// Per-sink breaker settings; unset fields fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkBreakerOverride {
    pub enabled: bool,
    pub failure_threshold: Option<u32>,
    pub open_duration_seconds: Option<u64>,
}

impl Default for SinkBreakerOverride {
    fn default() -> Self {
        Self { enabled: true, failure_threshold: None, open_duration_seconds: None }
    }
}

/// Dead-letter queue and reprocessor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadLetterOptions {
    pub enabled: bool,
    pub max_size: usize,
    pub overflow: OverflowPolicy,
    pub processing_interval_ms: u64,
    pub batch_size: usize,
    pub enable_auto_processing: bool,
    /// Records whose retry count reaches this value are dropped.
    pub max_reprocess_attempts: Option<u32>,
}

impl Default for DeadLetterOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: DEFAULT_DLQ_MAX_SIZE,
            overflow: OverflowPolicy::DropOldest,
            processing_interval_ms: DEFAULT_DLQ_PROCESSING_INTERVAL_MS,
            batch_size: DEFAULT_DLQ_BATCH_SIZE,
            enable_auto_processing: true,
            max_reprocess_attempts: None,
        }
    }
}

impl DeadLetterOptions {
    pub fn processing_interval(&self) -> Duration {
        Duration::from_millis(self.processing_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrometheusOptions {
    pub enabled: bool,
    pub path: String,
    pub port: Option<u16>,
}

impl Default for PrometheusOptions {
    fn default() -> Self {
        Self { enabled: true, path: "/metrics".to_string(), port: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OtlpOptions {
    pub enabled: bool,
    pub endpoint: String,
    pub timeout_seconds: u64,
    pub compression: bool,
    pub headers: BTreeMap<String, String>,
}

impl Default for OtlpOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "http://localhost:4318".to_string(),
            timeout_seconds: 30,
            compression: true,
            headers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsdOptions {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// Prepended as `prefix.` to every metric name when non-empty.
    pub prefix: String,
    pub max_packet_size: usize,
}

impl Default for StatsdOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 8125,
            prefix: String::new(),
            max_packet_size: 1_432,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaOptions {
    pub enabled: bool,
    pub bootstrap_servers: String,
    pub topic: String,
    pub batch_size: usize,
}

impl Default for KafkaOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            bootstrap_servers: "localhost:9092".to_string(),
            topic: "metrics".to_string(),
            batch_size: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfluxOptions {
    pub enabled: bool,
    pub url: String,
    pub org: String,
    pub bucket: String,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for InfluxOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "http://localhost:8086".to_string(),
            org: String::new(),
            bucket: "metrics".to_string(),
            token: None,
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingOptions {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}
