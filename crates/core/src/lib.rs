//! # MetricFlow Core
//!
//! In-process metric state and the ports the export pipeline drives.
//!
//! This crate contains:
//! - Concurrent accumulators (counter, gauge, histogram, summary, sliding
//!   window) keyed by tag-set fingerprint
//! - The [`MetricRegistry`] and its read-only [`RegistrySnapshot`]
//! - The [`Aggregator`] for ad hoc statistics
//! - The bounded [`MetricBus`]
//! - The [`MetricsSink`] port and the [`DeadLetterQueue`]
//! - The [`MetricsClient`] instrumentation facade
//!
//! ## Architecture Principles
//! - Only depends on `metricflow-common` and `metricflow-domain`
//! - No network or file I/O
//! - Sinks are reached only through the [`MetricsSink`] trait
//! - The recording fast path never fails and never blocks on export

pub mod aggregation;
pub mod bus;
pub mod client;
pub mod dead_letter;
pub mod export;
pub mod metrics;
pub mod registry;

pub use aggregation::{AggregatedStats, AggregationType, Aggregator};
pub use bus::{BusStatus, MetricBus, MetricEvent};
pub use client::{MetricTimer, MetricsClient};
pub use dead_letter::{DeadLetterQueue, DeadLetterStats, EnqueueOutcome, FailedMetric};
pub use export::{MetricsSink, SinkError};
pub use metrics::TagSet;
pub use registry::{
    BucketCount, MetricPoint, MetricRegistry, PointValue, QuantileValue, RegistrySnapshot,
};
