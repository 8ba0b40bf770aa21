//! Quantile summary over a bounded reservoir of recent samples.
//!
//! Each series keeps the last `max_samples` observations plus an all-time
//! count and sum. Quantiles are nearest-rank over one sorted copy of the
//! retained samples, so within a single read `p50 <= p90 <= p99`.

use metricflow_common::collections::SampleWindow;
use metricflow_domain::constants::{DEFAULT_SUMMARY_MAX_SAMPLES, DEFAULT_SUMMARY_QUANTILES};
use parking_lot::Mutex;
use tracing::warn;

use super::series::{SeriesMap, SeriesSample};
use super::tags::TagSet;

/// Exported view of one summary series.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryData {
    /// `(quantile, value)` in ascending quantile order.
    pub quantiles: Vec<(f64, f64)>,
    pub count: u64,
    pub sum: f64,
}

#[derive(Debug)]
struct SummaryState {
    window: SampleWindow,
    count: u64,
    sum: f64,
}

/// Quantiles of recent observations per tag set.
#[derive(Debug)]
pub struct Summary {
    name: String,
    description: String,
    quantiles: Vec<f64>,
    max_samples: usize,
    series: SeriesMap<Mutex<SummaryState>>,
}

impl Summary {
    /// Creates a summary reporting `quantiles` over at most `max_samples`
    /// retained observations per series.
    ///
    /// Quantiles outside `[0, 1]` are discarded; an empty list falls back to
    /// the defaults.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        quantiles: Option<&[f64]>,
        max_samples: Option<usize>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            quantiles: normalize_quantiles(quantiles),
            max_samples: max_samples.unwrap_or(DEFAULT_SUMMARY_MAX_SAMPLES).max(1),
            series: SeriesMap::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn quantiles(&self) -> &[f64] {
        &self.quantiles
    }

    pub fn max_samples(&self) -> usize {
        self.max_samples
    }

    /// Records one observation for `tags`. NaN is ignored.
    pub fn observe(&self, tags: &TagSet, value: f64) {
        if value.is_nan() {
            warn!(metric = %self.name, "ignoring NaN summary observation");
            return;
        }
        let max_samples = self.max_samples;
        let series = self.series.get_or_insert_with(tags, || {
            Mutex::new(SummaryState { window: SampleWindow::new(max_samples), count: 0, sum: 0.0 })
        });
        let mut state = series.state.lock();
        state.window.push(value);
        state.count += 1;
        state.sum += value;
    }

    pub fn data(&self, tags: &TagSet) -> Option<SummaryData> {
        self.series.get(tags).map(|series| self.read(&series.state))
    }

    pub fn get_all_data(&self) -> Vec<SeriesSample<SummaryData>> {
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

    fn read(&self, state: &Mutex<SummaryState>) -> SummaryData {
        let state = state.lock();
        SummaryData {
            quantiles: state.window.quantiles(&self.quantiles),
            count: state.count,
            sum: state.sum,
        }
    }
}

/// Keeps quantiles within `[0, 1]`, sorted and unique.
pub(crate) fn normalize_quantiles(quantiles: Option<&[f64]>) -> Vec<f64> {
    let mut qs: Vec<f64> = quantiles
        .unwrap_or_default()
        .iter()
        .copied()
        .filter(|q| (0.0..=1.0).contains(q))
        .collect();
    qs.sort_by(f64::total_cmp);
    qs.dedup();
    if qs.is_empty() {
        DEFAULT_SUMMARY_QUANTILES.to_vec()
    } else {
        qs
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    /// Validates quantile values, count and sum on a uniform range.
    #[test]
    fn test_summary_quantiles_count_sum() {
        let summary = Summary::new("latency", "", Some(&[0.5, 0.9, 0.99]), None);
        let tags = TagSet::new();
        for v in 1..=100 {
            summary.observe(&tags, f64::from(v));
        }
        let data = summary.data(&tags).unwrap();
        assert_eq!(data.quantiles, vec![(0.5, 50.0), (0.9, 90.0), (0.99, 99.0)]);
        assert_eq!(data.count, 100);
        assert!((data.sum - 5_050.0).abs() < f64::EPSILON);
    }

    /// Validates monotonic quantiles under concurrent writers.
    #[test]
    fn test_summary_monotonic_under_concurrency() {
        let summary = Arc::new(Summary::new("s", "", None, Some(128)));
        let handles: Vec<_> = (0..4)
            .map(|w| {
                let summary = Arc::clone(&summary);
                thread::spawn(move || {
                    let tags = TagSet::new();
                    for i in 0..500 {
                        summary.observe(&tags, f64::from((i * 37 + w * 11) % 997));
                    }
                })
            })
            .collect();
        for _ in 0..100 {
            if let Some(data) = summary.data(&TagSet::new()) {
                assert!(data.quantiles.windows(2).all(|w| w[0].1 <= w[1].1));
            }
        }
        for handle in handles {
            handle.join().unwrap();
        }
        let data = summary.data(&TagSet::new()).unwrap();
        assert_eq!(data.count, 2_000);
        assert!(data.quantiles.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    /// Validates quantile normalization and defaults.
    #[test]
    fn test_quantile_normalization() {
        let summary = Summary::new("s", "", Some(&[0.99, 1.5, 0.5, -0.1, 0.5]), None);
        assert_eq!(summary.quantiles(), &[0.5, 0.99]);
        let defaulted = Summary::new("s", "", Some(&[2.0]), None);
        assert_eq!(defaulted.quantiles(), DEFAULT_SUMMARY_QUANTILES);
    }
}
