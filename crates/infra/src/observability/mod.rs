//! Observability for the engine itself
//!
//! The engine reports its own activity through `tracing`; this module wires
//! the subscriber from [`LoggingOptions`](metricflow_domain::LoggingOptions).

pub mod logging;

pub use logging::{build_filter, init_logging};
