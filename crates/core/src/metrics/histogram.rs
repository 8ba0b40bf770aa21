//! Cumulative bucketed histogram.
//!
//! Bucket boundaries are fixed when the histogram is created. Each series
//! keeps one atomic counter per boundary, a total count and a running sum.
//! `observe(x)` increments every bucket whose upper bound is `>= x`, so the
//! stored counts are already cumulative; the implicit `+Inf` bucket is the
//! total count.
//!
//! Bucket counters, count and sum are updated with independent atomics. A
//! concurrent snapshot may therefore see `count`/`sum` include an observation
//! whose bucket increments are not yet visible, but never the reverse: every
//! bucket is at most `count`, and the skew is bounded by the number of
//! in-flight `observe` calls.

use std::sync::atomic::{AtomicU64, Ordering};

use metricflow_domain::constants::DEFAULT_HISTOGRAM_BUCKETS;
use tracing::warn;

use super::atomic::AtomicF64;
use super::series::{SeriesMap, SeriesSample};
use super::tags::TagSet;

/// Per-series histogram state.
#[derive(Debug)]
pub struct HistogramState {
    buckets: Box<[AtomicU64]>,
    count: AtomicU64,
    sum: AtomicF64,
}

impl HistogramState {
    fn new(bucket_count: usize) -> Self {
        Self {
            buckets: (0..bucket_count).map(|_| AtomicU64::new(0)).collect(),
            count: AtomicU64::new(0),
            sum: AtomicF64::default(),
        }
    }
}

/// Exported view of one histogram series.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramData {
    /// `(upper_bound, cumulative_count)` per configured boundary.
    pub buckets: Vec<(f64, u64)>,
    pub count: u64,
    pub sum: f64,
}

/// Distribution of observations over fixed boundaries.
#[derive(Debug)]
pub struct Histogram {
    name: String,
    description: String,
    bounds: Vec<f64>,
    series: SeriesMap<HistogramState>,
}

impl Histogram {
    /// Creates a histogram with the given boundaries.
    ///
    /// Non-finite boundaries are discarded and the rest sorted and
    /// de-duplicated. An empty result falls back to the default boundaries.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        buckets: Option<&[f64]>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            bounds: normalize_buckets(buckets),
            series: SeriesMap::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Normalized upper bounds, ascending.
    pub fn buckets(&self) -> &[f64] {
        &self.bounds
    }

    /// Records one observation for `tags`. NaN is ignored.
    pub fn observe(&self, tags: &TagSet, value: f64) {
        if value.is_nan() {
            warn!(metric = %self.name, "ignoring NaN histogram observation");
            return;
        }
        let bucket_count = self.bounds.len();
        let series = self.series.get_or_insert_with(tags, || HistogramState::new(bucket_count));
        let state = &series.state;

        // Count first: a reader that sees a bucket increment also sees it.
        state.count.fetch_add(1, Ordering::Release);
        state.sum.fetch_add(value);
        // Bounds are ascending, so the buckets to bump form a suffix.
        let first = self.bounds.partition_point(|bound| *bound < value);
        for bucket in state.buckets.iter().skip(first) {
            bucket.fetch_add(1, Ordering::Release);
        }
    }

    pub fn data(&self, tags: &TagSet) -> Option<HistogramData> {
        self.series.get(tags).map(|series| self.read(&series.state))
    }

    pub fn get_all_data(&self) -> Vec<SeriesSample<HistogramData>> {
        self.series
            .collect()
            .into_iter()
            .map(|(fingerprint, series)| SeriesSample {
                fingerprint,
                tags: series.tags.clone(),
                value: self.read(&series.state),
            })
            .collect()
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    pub fn reset(&self) {
        self.series.clear();
    }

    fn read(&self, state: &HistogramState) -> HistogramData {
        // Every observation counted here, except each writer's latest, has
        // its buckets visible below. Clamping to the last bucket then keeps
        // `count - last <= in-flight observe calls` and `last <= count`.
        let counted = state.count.load(Ordering::Acquire);
        let buckets: Vec<(f64, u64)> = self
            .bounds
            .iter()
            .zip(state.buckets.iter())
            .map(|(bound, counter)| (*bound, counter.load(Ordering::Acquire)))
            .collect();
        let count = buckets.last().map_or(counted, |(_, last)| counted.max(*last));
        let sum = state.sum.load();
        HistogramData { buckets, count, sum }
    }
}

fn normalize_buckets(buckets: Option<&[f64]>) -> Vec<f64> {
    let mut bounds: Vec<f64> =
        buckets.unwrap_or_default().iter().copied().filter(|b| b.is_finite()).collect();
    bounds.sort_by(f64::total_cmp);
    bounds.dedup();
    if bounds.is_empty() {
        DEFAULT_HISTOGRAM_BUCKETS.to_vec()
    } else {
        bounds
    }
}
