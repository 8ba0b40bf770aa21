//! Summary restricted to a trailing time window.
//!
//! Samples carry their observation instant. Expired samples are evicted
//! lazily when a series is written or read: a sample observed at `T` is
//! excluded from every read at or after `T + window`. A per-series sample
//! cap bounds memory when the observation rate is high.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metricflow_common::collections::nearest_rank;
use metricflow_common::resilience::{Clock, SystemClock};
use metricflow_domain::constants::DEFAULT_SLIDING_WINDOW_MAX_SAMPLES;
use parking_lot::Mutex;
use tracing::warn;

use super::series::{SeriesMap, SeriesSample};
use super::summary::{normalize_quantiles, SummaryData};
use super::tags::TagSet;

#[derive(Debug, Default)]
struct WindowState {
    samples: VecDeque<(Instant, f64)>,
}

impl WindowState {
    fn evict_expired(&mut self, now: Instant, window: Duration) {
        while let Some((observed_at, _)) = self.samples.front() {
            if now.saturating_duration_since(*observed_at) >= window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Quantiles, count and sum over the samples of the last `window`.
pub struct SlidingWindowSummary {
    name: String,
    description: String,
    window: Duration,
    quantiles: Vec<f64>,
    max_samples: usize,
    clock: Arc<dyn Clock>,
    series: SeriesMap<Mutex<WindowState>>,
}

impl std::fmt::Debug for SlidingWindowSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindowSummary")
            .field("name", &self.name)
            .field("window", &self.window)
            .field("quantiles", &self.quantiles)
            .field("series", &self.series.len())
            .finish_non_exhaustive()
    }
}

impl SlidingWindowSummary {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        window: Duration,
        quantiles: Option<&[f64]>,
    ) -> Self {
        Self::with_clock(name, description, window, quantiles, Arc::new(SystemClock))
    }

    /// Creates a window summary reading time from `clock`.
    pub fn with_clock(
        name: impl Into<String>,
        description: impl Into<String>,
        window: Duration,
        quantiles: Option<&[f64]>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            window: window.max(Duration::from_millis(1)),
            quantiles: normalize_quantiles(quantiles),
            max_samples: DEFAULT_SLIDING_WINDOW_MAX_SAMPLES,
            clock,
            series: SeriesMap::default(),
        }
    }

    /// Caps retained samples per series.
    #[must_use]
    pub fn with_max_samples(mut self, max_samples: usize) -> Self {
        self.max_samples = max_samples.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn quantiles(&self) -> &[f64] {
        &self.quantiles
    }

    /// Records one observation at the clock's current instant.
    pub fn observe(&self, tags: &TagSet, value: f64) {
        if value.is_nan() {
            warn!(metric = %self.name, "ignoring NaN sliding window observation");
            return;
        }
        let now = self.clock.now();
        let series = self.series.get_or_insert_with(tags, || Mutex::new(WindowState::default()));
        let mut state = series.state.lock();
        state.evict_expired(now, self.window);
        if state.samples.len() >= self.max_samples {
            state.samples.pop_front();
        }
        state.samples.push_back((now, value));
    }

    /// In-window statistics for `tags`.
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

    fn read(&self, state: &Mutex<WindowState>) -> SummaryData {
        let now = self.clock.now();
        let mut state = state.lock();
        state.evict_expired(now, self.window);

        let mut sorted: Vec<f64> = state.samples.iter().map(|(_, v)| *v).collect();
        drop(state);
        sorted.sort_by(f64::total_cmp);

        let quantiles = self
            .quantiles
            .iter()
            .filter_map(|&q| nearest_rank(&sorted, q).map(|v| (q, v)))
            .collect();
        SummaryData { quantiles, count: sorted.len() as u64, sum: sorted.iter().sum() }
    }
}

#[cfg(test)]
mod tests {
    use metricflow_common::resilience::MockClock;

    use super::*;

    fn window_summary(window_secs: u64) -> (SlidingWindowSummary, MockClock) {
        let clock = MockClock::new();
        let summary = SlidingWindowSummary::with_clock(
            "recent_latency",
            "",
            Duration::from_secs(window_secs),
            Some(&[0.5, 0.9, 0.99]),
            Arc::new(clock.clone()),
        );
        (summary, clock)
    }

    /// Validates that an observation expires exactly at `T + window`.
    ///
    /// Assertions:
    /// - Visible just before the window elapses
    /// - Excluded at exactly `T + window`
    #[test]
    fn test_observation_excluded_at_window_boundary() {
        let (summary, clock) = window_summary(60);
        let tags = TagSet::new();
        summary.observe(&tags, 5.0);

        clock.advance(Duration::from_millis(59_999));
        assert_eq!(summary.data(&tags).unwrap().count, 1);

        clock.advance(Duration::from_millis(1));
        let data = summary.data(&tags).unwrap();
        assert_eq!(data.count, 0);
        assert!(data.quantiles.is_empty());
    }

    /// Validates that only in-window samples feed quantiles and sums.
    #[test]
    fn test_mixed_ages() {
        let (summary, clock) = window_summary(10);
        let tags = TagSet::new().with("route", "/a");
        summary.observe(&tags, 1_000.0);
        clock.advance(Duration::from_secs(6));
        for v in [1.0, 2.0, 3.0] {
            summary.observe(&tags, v);
        }
        clock.advance(Duration::from_secs(5));

        let data = summary.data(&tags).unwrap();
        assert_eq!(data.count, 3);
        assert!((data.sum - 6.0).abs() < f64::EPSILON);
        assert!(data.quantiles.windows(2).all(|w| w[0].1 <= w[1].1));
        assert_eq!(data.quantiles.last().map(|q| q.1), Some(3.0));
    }

    /// Validates the per-series sample cap.
    #[test]
    fn test_max_samples_cap() {
        let (summary, _clock) = window_summary(60);
        let summary = summary.with_max_samples(3);
        let tags = TagSet::new();
        for v in 0..10 {
            summary.observe(&tags, f64::from(v));
        }
        let data = summary.data(&tags).unwrap();
        assert_eq!(data.count, 3);
        assert!((data.sum - 24.0).abs() < f64::EPSILON);
    }
}
