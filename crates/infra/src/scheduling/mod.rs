//! Background schedulers of the export pipeline
//!
//! - [`MetricFlushScheduler`]: periodic snapshot + fan-out export to sinks
//! - [`DeadLetterReprocessor`]: periodic replay of dead-lettered points
//!
//! Both follow the same runtime rules:
//! - Explicit lifecycle management (start/stop, restartable)
//! - Join handles for spawned tasks; `stop` awaits the in-flight tick
//! - Cancellation token support
//! - Timeout wrapping on every export attempt
//! - Panics inside a tick are caught and logged; the loop keeps running

pub mod dlq_processor;
pub mod error;
pub mod flush_scheduler;
mod lifecycle;

pub use dlq_processor::{DeadLetterReprocessor, ReprocessReport, ReprocessorConfig};
pub use error::{SchedulerError, SchedulerResult};
pub use flush_scheduler::{FlushReport, FlushSchedulerConfig, MetricFlushScheduler};
