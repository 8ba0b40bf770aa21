//! Bounded collections used by the metric accumulators.

pub mod sample_window;

pub use sample_window::{nearest_rank, SampleWindow};
