//! Concurrent metric accumulators.
//!
//! Every accumulator owns a map from tag-set fingerprint to series state.
//! Updates to an existing series touch only that series (an atomic or a
//! per-series lock); no update path takes a lock shared across series.

pub mod atomic;
pub mod counter;
pub mod gauge;
pub mod histogram;
mod series;
pub mod sliding_window;
pub mod summary;
pub mod tags;

pub use counter::Counter;
pub use gauge::Gauge;
pub use histogram::{Histogram, HistogramData};
pub use series::{Series, SeriesSample};
pub use sliding_window::SlidingWindowSummary;
pub use summary::{Summary, SummaryData};
pub use tags::TagSet;
