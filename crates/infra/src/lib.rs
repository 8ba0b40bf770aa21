//! # MetricFlow Infrastructure
//!
//! Runtime side of the engine: everything that touches the network, the
//! clock or the process environment.
//!
//! This crate contains:
//! - Per-sink circuit breakers and the export retry policy
//! - The flush scheduler and the dead-letter reprocessor
//! - Sink adapters (Prometheus, OTLP, StatsD, Kafka, InfluxDB)
//! - Configuration loading and logging initialisation
//! - The pipeline health report
//!
//! ## Architecture
//! - Implements the `MetricsSink` port defined in `metricflow-core`
//! - Depends on `metricflow-common`, `metricflow-domain` and `metricflow-core`
//! - Contains all "impure" code (sockets, HTTP, timers, env)

pub mod config;
pub mod errors;
pub mod exporters;
pub mod health;
pub mod http;
pub mod observability;
pub mod resilience;
pub mod scheduling;

// Re-export commonly used items
pub use errors::InfraError;
pub use exporters::{build_sinks, InfluxSink, KafkaSink, OtlpSink, PrometheusSink, StatsdSink};
pub use health::{HealthReport, HealthReporter, SinkHealth};
pub use observability::init_logging;
pub use resilience::{retry_policy_from, SinkCircuitBreakerManager};
pub use scheduling::{
    DeadLetterReprocessor, FlushReport, FlushSchedulerConfig, MetricFlushScheduler,
    ReprocessReport, ReprocessorConfig, SchedulerError, SchedulerResult,
};
