//! Monotonic counter.

use tracing::warn;

use super::atomic::AtomicF64;
use super::series::{SeriesMap, SeriesSample};
use super::tags::TagSet;

/// Monotonically non-decreasing total per tag set.
///
/// Negative, NaN and infinite deltas are dropped with a warning; the value of
/// a series only decreases through [`reset`](Self::reset).
#[derive(Debug)]
pub struct Counter {
    name: String,
    description: String,
    series: SeriesMap<AtomicF64>,
}

impl Counter {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(), description: description.into(), series: SeriesMap::default() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Adds `delta` to the series for `tags`.
    pub fn inc(&self, tags: &TagSet, delta: f64) {
        if !delta.is_finite() || delta < 0.0 {
            warn!(metric = %self.name, delta, "ignoring invalid counter delta");
            return;
        }
        self.series.get_or_insert_with(tags, AtomicF64::default).state.fetch_add(delta);
    }

    /// Adds one.
    pub fn increment(&self, tags: &TagSet) {
        self.inc(tags, 1.0);
    }

    /// Current total for `tags`, zero when the series does not exist.
    pub fn value(&self, tags: &TagSet) -> f64 {
        self.series.get(tags).map_or(0.0, |series| series.state.load())
    }

    /// Current totals of every series.
    pub fn get_all_values(&self) -> Vec<SeriesSample<f64>> {
        self.series
            .collect()
            .into_iter()
            .map(|(fingerprint, series)| SeriesSample {
                fingerprint,
                tags: series.tags.clone(),
                value: series.state.load(),
            })
            .collect()
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    /// Drops every series.
    pub fn reset(&self) {
        self.series.clear();
    }
}
