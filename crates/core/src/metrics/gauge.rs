//! Last-write-wins gauge.

use tracing::warn;

use super::atomic::AtomicF64;
use super::series::{SeriesMap, SeriesSample};
use super::tags::TagSet;

/// Point-in-time value per tag set.
#[derive(Debug)]
pub struct Gauge {
    name: String,
    description: String,
    series: SeriesMap<AtomicF64>,
}

impl Gauge {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self { name: name.into(), description: description.into(), series: SeriesMap::default() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Replaces the value for `tags`. NaN is ignored.
    pub fn set(&self, tags: &TagSet, value: f64) {
        if value.is_nan() {
            warn!(metric = %self.name, "ignoring NaN gauge value");
            return;
        }
        self.series.get_or_insert_with(tags, AtomicF64::default).state.store(value);
    }

    /// Adds `delta` (may be negative) to the value for `tags`.
    pub fn add(&self, tags: &TagSet, delta: f64) {
        if !delta.is_finite() {
            warn!(metric = %self.name, delta, "ignoring non-finite gauge delta");
            return;
        }
        self.series.get_or_insert_with(tags, AtomicF64::default).state.fetch_add(delta);
    }

    pub fn value(&self, tags: &TagSet) -> Option<f64> {
        self.series.get(tags).map(|series| series.state.load())
    }

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

    pub fn reset(&self) {
        self.series.clear();
    }
}
