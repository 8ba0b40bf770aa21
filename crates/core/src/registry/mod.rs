//! The metric registry.
//!
//! A [`MetricRegistry`] owns one concurrent map per metric kind, keyed by
//! metric name. `get_or_create_*` is race-free: concurrent first access with
//! the same name yields one shared accumulator. Configuration supplied on
//! first creation wins; a later call with different buckets, quantiles or
//! window returns the existing instance unchanged, logs the conflict and
//! bumps [`config_conflicts`](MetricRegistry::config_conflicts).
//!
//! Kinds are separate namespaces. Reusing a name across kinds is allowed but
//! logged, since most exposition formats cannot represent it.
//!
//! The registry is an owned value; share it with `Arc<MetricRegistry>`.
//! Nothing in this crate holds a process-global registry.

mod snapshot;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use metricflow_common::resilience::{Clock, SystemClock};
use tracing::{debug, warn};

pub use snapshot::{BucketCount, MetricPoint, PointValue, QuantileValue, RegistrySnapshot};

use crate::metrics::{
    Counter, Gauge, Histogram, HistogramData, SlidingWindowSummary, Summary, SummaryData,
};

/// Process-lifetime catalog of metric accumulators.
pub struct MetricRegistry {
    counters: DashMap<String, Arc<Counter>>,
    gauges: DashMap<String, Arc<Gauge>>,
    histograms: DashMap<String, Arc<Histogram>>,
    summaries: DashMap<String, Arc<Summary>>,
    sliding_windows: DashMap<String, Arc<SlidingWindowSummary>>,
    clock: Arc<dyn Clock>,
    config_conflicts: AtomicU64,
    name_collisions: AtomicU64,
}

impl std::fmt::Debug for MetricRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricRegistry")
            .field("counters", &self.counters.len())
            .field("gauges", &self.gauges.len())
            .field("histograms", &self.histograms.len())
            .field("summaries", &self.summaries.len())
            .field("sliding_windows", &self.sliding_windows.len())
            .finish_non_exhaustive()
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// A registry whose sliding windows read time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: DashMap::new(),
            gauges: DashMap::new(),
            histograms: DashMap::new(),
            summaries: DashMap::new(),
            sliding_windows: DashMap::new(),
            clock,
            config_conflicts: AtomicU64::new(0),
            name_collisions: AtomicU64::new(0),
        }
    }

    // =========================================================================
    // Get-or-create
    // =========================================================================

    pub fn get_or_create_counter(&self, name: &str, description: &str) -> Arc<Counter> {
        if let Some(existing) = self.counters.get(name) {
            return Arc::clone(existing.value());
        }
        self.warn_on_name_reuse(name, Family::Counter);
        let entry = self
            .counters
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Counter::new(name, description)));
        Arc::clone(entry.value())
    }

    pub fn get_or_create_gauge(&self, name: &str, description: &str) -> Arc<Gauge> {
        if let Some(existing) = self.gauges.get(name) {
            return Arc::clone(existing.value());
        }
        self.warn_on_name_reuse(name, Family::Gauge);
        let entry = self
            .gauges
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Gauge::new(name, description)));
        Arc::clone(entry.value())
    }

    /// Returns the histogram named `name`, creating it with `buckets`
    /// (or the defaults) on first use.
    pub fn get_or_create_histogram(
        &self,
        name: &str,
        description: &str,
        buckets: Option<&[f64]>,
    ) -> Arc<Histogram> {
        let histogram = match self.histograms.get(name) {
            Some(existing) => Arc::clone(existing.value()),
            None => {
                self.warn_on_name_reuse(name, Family::Histogram);
                let entry = self
                    .histograms
                    .entry(name.to_string())
                    .or_insert_with(|| Arc::new(Histogram::new(name, description, buckets)));
                Arc::clone(entry.value())
            }
        };
        if let Some(requested) = buckets {
            let normalized = Histogram::new(name, "", Some(requested));
            if normalized.buckets() != histogram.buckets() {
                self.note_conflict(name, "histogram buckets");
            }
        }
        histogram
    }

    /// Returns the summary named `name`, creating it with `quantiles` and
    /// `max_samples` (or the defaults) on first use.
    pub fn get_or_create_summary(
        &self,
        name: &str,
        description: &str,
        quantiles: Option<&[f64]>,
        max_samples: Option<usize>,
    ) -> Arc<Summary> {
        let summary = match self.summaries.get(name) {
            Some(existing) => Arc::clone(existing.value()),
            None => {
                self.warn_on_name_reuse(name, Family::Summary);
                let entry = self.summaries.entry(name.to_string()).or_insert_with(|| {
                    Arc::new(Summary::new(name, description, quantiles, max_samples))
                });
                Arc::clone(entry.value())
            }
        };
        let requested = Summary::new(name, "", quantiles, max_samples);
        if (quantiles.is_some() && requested.quantiles() != summary.quantiles())
            || (max_samples.is_some() && requested.max_samples() != summary.max_samples())
        {
            self.note_conflict(name, "summary quantiles or sample cap");
        }
        summary
    }

    /// Returns the sliding-window summary named `name`, creating it with
    /// `window` and `quantiles` on first use.
    pub fn get_or_create_sliding_window(
        &self,
        name: &str,
        description: &str,
        window: Duration,
        quantiles: Option<&[f64]>,
    ) -> Arc<SlidingWindowSummary> {
        let summary = match self.sliding_windows.get(name) {
            Some(existing) => Arc::clone(existing.value()),
            None => {
                self.warn_on_name_reuse(name, Family::SlidingWindow);
                let clock = Arc::clone(&self.clock);
                let entry = self.sliding_windows.entry(name.to_string()).or_insert_with(|| {
                    Arc::new(SlidingWindowSummary::with_clock(
                        name,
                        description,
                        window,
                        quantiles,
                        clock,
                    ))
                });
                Arc::clone(entry.value())
            }
        };
        let requested = SlidingWindowSummary::new(name, "", window, quantiles);
        if requested.window() != summary.window()
            || (quantiles.is_some() && requested.quantiles() != summary.quantiles())
        {
            self.note_conflict(name, "sliding window duration or quantiles");
        }
        summary
    }

    // =========================================================================
    // Lookup and enumeration
    // =========================================================================

    pub fn counter(&self, name: &str) -> Option<Arc<Counter>> {
        self.counters.get(name).map(|e| Arc::clone(e.value()))
    }

    pub fn gauge(&self, name: &str) -> Option<Arc<Gauge>> {
        self.gauges.get(name).map(|e| Arc::clone(e.value()))
    }

    pub fn histogram(&self, name: &str) -> Option<Arc<Histogram>> {
        self.histograms.get(name).map(|e| Arc::clone(e.value()))
    }

    pub fn summary(&self, name: &str) -> Option<Arc<Summary>> {
        self.summaries.get(name).map(|e| Arc::clone(e.value()))
    }

    pub fn sliding_window(&self, name: &str) -> Option<Arc<SlidingWindowSummary>> {
        self.sliding_windows.get(name).map(|e| Arc::clone(e.value()))
    }

    pub fn get_all_counters(&self) -> Vec<Arc<Counter>> {
        self.counters.iter().map(|e| Arc::clone(e.value())).collect()
    }

    pub fn get_all_gauges(&self) -> Vec<Arc<Gauge>> {
        self.gauges.iter().map(|e| Arc::clone(e.value())).collect()
    }

    pub fn get_all_histograms(&self) -> Vec<Arc<Histogram>> {
        self.histograms.iter().map(|e| Arc::clone(e.value())).collect()
    }

    pub fn get_all_summaries(&self) -> Vec<Arc<Summary>> {
        self.summaries.iter().map(|e| Arc::clone(e.value())).collect()
    }

    pub fn get_all_sliding_windows(&self) -> Vec<Arc<SlidingWindowSummary>> {
        self.sliding_windows.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Number of registered metrics across all kinds.
    pub fn metric_count(&self) -> usize {
        self.counters.len()
            + self.gauges.len()
            + self.histograms.len()
            + self.summaries.len()
            + self.sliding_windows.len()
    }

    /// Times a `get_or_create_*` call asked for a configuration different
    /// from the one the metric was created with.
    pub fn config_conflicts(&self) -> u64 {
        self.config_conflicts.load(Ordering::Relaxed)
    }

    /// Times a new metric was created under a name another kind already
    /// uses.
    pub fn name_collisions(&self) -> u64 {
        self.name_collisions.load(Ordering::Relaxed)
    }

    /// Removes every metric. Handles held by callers keep working but are no
    /// longer exported.
    pub fn clear(&self) {
        self.counters.clear();
        self.gauges.clear();
        self.histograms.clear();
        self.summaries.clear();
        self.sliding_windows.clear();
    }

    // =========================================================================
    // Snapshot
    // =========================================================================

    /// Copies every series into an owned snapshot without mutating anything.
    pub fn snapshot(&self) -> RegistrySnapshot {
        let timestamp = Utc::now();
        let mut points = Vec::new();

        for counter in self.get_all_counters() {
            points.extend(counter.get_all_values().into_iter().map(|s| MetricPoint {
                name: counter.name().to_string(),
                description: counter.description().to_string(),
                tags: s.tags,
                value: PointValue::Counter { value: s.value },
            }));
        }
        for gauge in self.get_all_gauges() {
            points.extend(gauge.get_all_values().into_iter().map(|s| MetricPoint {
                name: gauge.name().to_string(),
                description: gauge.description().to_string(),
                tags: s.tags,
                value: PointValue::Gauge { value: s.value },
            }));
        }
        for histogram in self.get_all_histograms() {
            points.extend(histogram.get_all_data().into_iter().map(|s| MetricPoint {
                name: histogram.name().to_string(),
                description: histogram.description().to_string(),
                tags: s.tags,
                value: histogram_value(s.value),
            }));
        }
        for summary in self.get_all_summaries() {
            points.extend(summary.get_all_data().into_iter().map(|s| MetricPoint {
                name: summary.name().to_string(),
                description: summary.description().to_string(),
                tags: s.tags,
                value: summary_value(s.value),
            }));
        }
        for window in self.get_all_sliding_windows() {
            points.extend(window.get_all_data().into_iter().map(|s| MetricPoint {
                name: window.name().to_string(),
                description: window.description().to_string(),
                tags: s.tags,
                value: summary_value(s.value),
            }));
        }

        points.sort_by(|a, b| {
            a.kind()
                .cmp(&b.kind())
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.tags.cmp(&b.tags))
        });
        debug!(points = points.len(), "registry snapshot taken");
        RegistrySnapshot { timestamp, points, replay: false }
    }

    /// Warns when `name` already belongs to another accumulator family.
    ///
    /// Summaries and sliding windows both export as summaries, so sharing a
    /// name between them would emit the metric twice.
    fn warn_on_name_reuse(&self, name: &str, requested: Family) {
        let existing = [
            (Family::Counter, self.counters.contains_key(name)),
            (Family::Gauge, self.gauges.contains_key(name)),
            (Family::Histogram, self.histograms.contains_key(name)),
            (Family::Summary, self.summaries.contains_key(name)),
            (Family::SlidingWindow, self.sliding_windows.contains_key(name)),
        ];
        for (other, present) in existing {
            if present && other != requested {
                self.name_collisions.fetch_add(1, Ordering::Relaxed);
                warn!(
                    metric = name,
                    requested = requested.as_str(),
                    existing = other.as_str(),
                    "metric name reused across kinds"
                );
            }
        }
    }

    fn note_conflict(&self, name: &str, what: &str) {
        self.config_conflicts.fetch_add(1, Ordering::Relaxed);
        debug!(metric = name, conflict = what, "ignoring configuration for existing metric");
    }
}

/// Which map of the registry a metric lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Counter,
    Gauge,
    Histogram,
    Summary,
    SlidingWindow,
}

impl Family {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Histogram => "histogram",
            Self::Summary => "summary",
            Self::SlidingWindow => "sliding_window",
        }
    }
}

fn histogram_value(data: HistogramData) -> PointValue {
    PointValue::Histogram {
        buckets: data
            .buckets
            .into_iter()
            .map(|(upper_bound, count)| BucketCount { upper_bound, count })
            .collect(),
        count: data.count,
        sum: data.sum,
    }
}

fn summary_value(data: SummaryData) -> PointValue {
    PointValue::Summary {
        quantiles: data
            .quantiles
            .into_iter()
            .map(|(quantile, value)| QuantileValue { quantile, value })
            .collect(),
        count: data.count,
        sum: data.sum,
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use metricflow_common::resilience::MockClock;
    use metricflow_domain::MetricKind;

    use super::*;
    use crate::metrics::TagSet;

    /// Validates that concurrent first access yields one shared instance.
    #[test]
    fn test_get_or_create_is_race_free() {
        let registry = Arc::new(MetricRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let counter = registry.get_or_create_counter("hits", "Hits");
                    counter.increment(&TagSet::new());
                    counter
                })
            })
            .collect();
        let counters: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(counters.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert!((counters[0].value(&TagSet::new()) - 8.0).abs() < f64::EPSILON);
        assert_eq!(registry.get_all_counters().len(), 1);
    }

    /// Validates first configuration wins and conflicts are signalled.
    ///
    /// Assertions:
    /// - Buckets of the second call are ignored
    /// - The conflict counter increments once
    /// - Repeating the original configuration is not a conflict
    #[test]
    fn test_first_config_wins() {
        let registry = MetricRegistry::new();
        let first = registry.get_or_create_histogram("latency", "", Some(&[1.0, 2.0]));
        first.observe(&TagSet::new(), 1.5);

        let second = registry.get_or_create_histogram("latency", "", Some(&[10.0]));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.buckets(), &[1.0, 2.0]);
        assert_eq!(second.data(&TagSet::new()).unwrap().count, 1);
        assert_eq!(registry.config_conflicts(), 1);

        registry.get_or_create_histogram("latency", "", Some(&[2.0, 1.0]));
        registry.get_or_create_histogram("latency", "", None);
        assert_eq!(registry.config_conflicts(), 1);

        registry.get_or_create_summary("s", "", Some(&[0.5]), None);
        registry.get_or_create_summary("s", "", Some(&[0.9]), None);
        assert_eq!(registry.config_conflicts(), 2);
    }

    /// Validates kinds are separate namespaces.
    #[test]
    fn test_kinds_are_separate_namespaces() {
        let registry = MetricRegistry::new();
        registry.get_or_create_counter("jobs", "").inc(&TagSet::new(), 2.0);
        registry.get_or_create_gauge("jobs", "").set(&TagSet::new(), 9.0);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.points_of(MetricKind::Counter).count(), 1);
        assert_eq!(snapshot.points_of(MetricKind::Gauge).count(), 1);
    }

    /// Validates reusing a name across kinds is flagged, including a
    /// summary and a sliding window that would export under one name.
    #[test]
    fn test_name_reuse_across_kinds_is_counted() {
        let registry = MetricRegistry::new();
        registry.get_or_create_summary("payload", "", None, None);
        registry.get_or_create_summary("payload", "", None, None);
        assert_eq!(registry.name_collisions(), 0);

        registry.get_or_create_sliding_window("payload", "", Duration::from_secs(5), None);
        assert_eq!(registry.name_collisions(), 1);

        registry.get_or_create_sliding_window("recent", "", Duration::from_secs(5), None);
        registry.get_or_create_summary("recent", "", None, None);
        assert_eq!(registry.name_collisions(), 2);

        registry.get_or_create_counter("jobs", "");
        registry.get_or_create_gauge("jobs", "");
        assert_eq!(registry.name_collisions(), 3);
        assert_eq!(registry.config_conflicts(), 0);
    }

    /// Validates the snapshot content and ordering.
    #[test]
    fn test_snapshot_contents() {
        let registry = MetricRegistry::new();
        let prod = TagSet::new().with("env", "prod");
        registry.get_or_create_counter("requests_total", "Requests").inc(&prod, 7.0);
        registry.get_or_create_gauge("temperature", "").set(&TagSet::new(), 21.5);
        registry.get_or_create_histogram("latency", "", Some(&[1.0])).observe(&prod, 0.5);
        registry.get_or_create_summary("size", "", Some(&[0.5]), None).observe(&prod, 3.0);

        let snapshot = registry.snapshot();
        let kinds: Vec<_> = snapshot.points.iter().map(MetricPoint::kind).collect();
        assert_eq!(
            kinds,
            vec![MetricKind::Counter, MetricKind::Gauge, MetricKind::Histogram, MetricKind::Summary]
        );
        let counter = &snapshot.points[0];
        assert_eq!(counter.name, "requests_total");
        assert_eq!(counter.description, "Requests");
        assert_eq!(counter.tags, prod);
        assert_eq!(counter.value, PointValue::Counter { value: 7.0 });
        assert_eq!(
            snapshot.points[2].value,
            PointValue::Histogram {
                buckets: vec![BucketCount { upper_bound: 1.0, count: 1 }],
                count: 1,
                sum: 0.5
            }
        );
    }

    /// Validates snapshots are read-only.
    #[test]
    fn test_snapshot_does_not_mutate() {
        let registry = MetricRegistry::new();
        registry.get_or_create_counter("c", "").inc(&TagSet::new(), 3.0);
        let first = registry.snapshot();
        let second = registry.snapshot();
        assert_eq!(first.points, second.points);
    }

    /// Validates sliding windows use the registry clock and export as summaries.
    #[test]
    fn test_sliding_window_uses_registry_clock() {
        let clock = MockClock::new();
        let registry = MetricRegistry::with_clock(Arc::new(clock.clone()));
        let window =
            registry.get_or_create_sliding_window("recent", "", Duration::from_secs(5), None);
        window.observe(&TagSet::new(), 1.0);

        assert_eq!(registry.snapshot().points_of(MetricKind::Summary).count(), 1);
        clock.advance(Duration::from_secs(5));
        match &registry.snapshot().points[0].value {
            PointValue::Summary { count, .. } => assert_eq!(*count, 0),
            other => panic!("unexpected point value {other:?}"),
        }
    }

    /// Validates clear removes every metric.
    #[test]
    fn test_clear() {
        let registry = MetricRegistry::new();
        registry.get_or_create_counter("a", "");
        registry.get_or_create_gauge("b", "");
        assert_eq!(registry.metric_count(), 2);
        registry.clear();
        assert_eq!(registry.metric_count(), 0);
        assert!(registry.snapshot().is_empty());
    }
}
