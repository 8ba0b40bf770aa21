//! Ad hoc statistics over raw values, independent of the registry.
//!
//! The [`Aggregator`] keys rolling aggregates by `(metric name, tag-set
//! fingerprint)`. It keeps exact count, sum, min and max, and a bounded
//! reservoir of recent values for percentiles. [`Aggregator::get_stats`]
//! reads all statistics under the key's lock, so the bundle is consistent as
//! of the call.
//!
//! # Example
//!
//! ```rust
//! use metricflow_core::aggregation::{AggregationType, Aggregator};
//! use metricflow_core::metrics::TagSet;
//!
//! let aggregator = Aggregator::new();
//! let tags = TagSet::new().with("route", "/login");
//! for v in [10.0, 20.0, 30.0] {
//!     aggregator.add_value("response_ms", v, &tags);
//! }
//! let avg = aggregator.get_aggregated_value("response_ms", AggregationType::Avg, &tags);
//! assert_eq!(avg, Some(20.0));
//! assert_eq!(aggregator.get_aggregated_value("unknown", AggregationType::Sum, &tags), None);
//! ```

use dashmap::DashMap;
use metricflow_common::collections::SampleWindow;
use metricflow_domain::constants::DEFAULT_AGGREGATOR_MAX_SAMPLES;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::metrics::TagSet;

/// Statistic to compute.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum AggregationType {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    /// Nearest-rank percentile, `0.0..=1.0`, over the retained values.
    Percentile(f64),
    /// Most recently added value.
    Last,
}

/// Full statistic bundle for one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedStats {
    pub count: u64,
    pub sum: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub last: f64,
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AggregationKey {
    name: String,
    fingerprint: String,
}

#[derive(Debug)]
struct AggregateState {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    last: f64,
    samples: SampleWindow,
}

impl AggregateState {
    fn new(max_samples: usize) -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            last: 0.0,
            samples: SampleWindow::new(max_samples),
        }
    }

    fn add(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.last = value;
        self.samples.push(value);
    }

    #[allow(clippy::cast_precision_loss)]
    fn avg(&self) -> f64 {
        self.sum / self.count as f64
    }
}

/// Rolling aggregates keyed by metric name and tags.
#[derive(Debug)]
pub struct Aggregator {
    entries: DashMap<AggregationKey, Mutex<AggregateState>>,
    max_samples: usize,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregator {
    pub fn new() -> Self {
        Self::with_max_samples(DEFAULT_AGGREGATOR_MAX_SAMPLES)
    }

    /// Retains at most `max_samples` values per key for percentiles.
    pub fn with_max_samples(max_samples: usize) -> Self {
        Self { entries: DashMap::new(), max_samples: max_samples.max(1) }
    }

    /// Feeds `value` into the aggregate for `(metric_name, tags)`.
    pub fn add_value(&self, metric_name: &str, value: f64, tags: &TagSet) {
        if !value.is_finite() {
            warn!(metric = metric_name, "ignoring non-finite aggregated value");
            return;
        }
        let key = AggregationKey { name: metric_name.to_string(), fingerprint: tags.fingerprint() };
        if let Some(entry) = self.entries.get(&key) {
            entry.lock().add(value);
            return;
        }
        let max_samples = self.max_samples;
        self.entries
            .entry(key)
            .or_insert_with(|| Mutex::new(AggregateState::new(max_samples)))
            .lock()
            .add(value);
    }

    /// The requested statistic, or `None` if nothing was added for the key.
    pub fn get_aggregated_value(
        &self,
        metric_name: &str,
        aggregation: AggregationType,
        tags: &TagSet,
    ) -> Option<f64> {
        let key = AggregationKey { name: metric_name.to_string(), fingerprint: tags.fingerprint() };
        let entry = self.entries.get(&key)?;
        let state = entry.lock();
        if state.count == 0 {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let value = match aggregation {
            AggregationType::Sum => state.sum,
            AggregationType::Avg => state.avg(),
            AggregationType::Min => state.min,
            AggregationType::Max => state.max,
            AggregationType::Count => state.count as f64,
            AggregationType::Last => state.last,
            AggregationType::Percentile(q) => return state.samples.quantile(q),
        };
        Some(value)
    }

    /// Every statistic for the key, read under one lock.
    pub fn get_stats(&self, metric_name: &str, tags: &TagSet) -> Option<AggregatedStats> {
        let key = AggregationKey { name: metric_name.to_string(), fingerprint: tags.fingerprint() };
        let entry = self.entries.get(&key)?;
        let state = entry.lock();
        if state.count == 0 {
            return None;
        }
        let percentiles = state.samples.quantiles(&[0.5, 0.9, 0.99]);
        let pick = |i: usize| percentiles.get(i).map_or(state.last, |(_, v)| *v);
        Some(AggregatedStats {
            count: state.count,
            sum: state.sum,
            avg: state.avg(),
            min: state.min,
            max: state.max,
            last: state.last,
            p50: pick(0),
            p90: pick(1),
            p99: pick(2),
        })
    }

    /// Forgets the aggregate for one key; returns whether it existed.
    pub fn remove(&self, metric_name: &str, tags: &TagSet) -> bool {
        let key = AggregationKey { name: metric_name.to_string(), fingerprint: tags.fingerprint() };
        self.entries.remove(&key).is_some()
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
