//! Export-side ports.

pub mod ports;

pub use ports::{MetricsSink, SinkError};
