//! Owned, read-only copies of registry state handed to sinks.

use chrono::{DateTime, Utc};
use metricflow_domain::MetricKind;
use serde::{Deserialize, Serialize};

use crate::metrics::TagSet;

/// One cumulative histogram bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketCount {
    pub upper_bound: f64,
    pub count: u64,
}

/// One reported quantile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantileValue {
    pub quantile: f64,
    pub value: f64,
}

/// Kind-specific value of a point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PointValue {
    Counter { value: f64 },
    Gauge { value: f64 },
    Histogram { buckets: Vec<BucketCount>, count: u64, sum: f64 },
    Summary { quantiles: Vec<QuantileValue>, count: u64, sum: f64 },
}

impl PointValue {
    pub const fn kind(&self) -> MetricKind {
        match self {
            Self::Counter { .. } => MetricKind::Counter,
            Self::Gauge { .. } => MetricKind::Gauge,
            Self::Histogram { .. } => MetricKind::Histogram,
            Self::Summary { .. } => MetricKind::Summary,
        }
    }
}

/// A single series value at snapshot time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub name: String,
    pub description: String,
    pub tags: TagSet,
    pub value: PointValue,
}

impl MetricPoint {
    pub const fn kind(&self) -> MetricKind {
        self.value.kind()
    }

    pub fn fingerprint(&self) -> String {
        self.tags.fingerprint()
    }
}

/// Every point the registry held at `timestamp`.
///
/// Points are ordered by kind, then name, then fingerprint, so exporters
/// that group by name see each metric's series contiguously.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub timestamp: DateTime<Utc>,
    pub points: Vec<MetricPoint>,
    /// Points are dead-lettered values being redelivered, possibly older
    /// than what the sink has already seen.
    #[serde(default)]
    pub replay: bool,
}

impl RegistrySnapshot {
    /// Wraps arbitrary points as a live snapshot.
    pub fn from_points(points: Vec<MetricPoint>) -> Self {
        Self { timestamp: Utc::now(), points, replay: false }
    }

    /// Wraps dead-lettered points for redelivery.
    ///
    /// Sinks that keep state across exports (pull caches, counter baselines)
    /// must not let a replay roll that state back.
    pub fn replay(points: Vec<MetricPoint>) -> Self {
        Self { timestamp: Utc::now(), points, replay: true }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points_of(&self, kind: MetricKind) -> impl Iterator<Item = &MetricPoint> {
        self.points.iter().filter(move |p| p.kind() == kind)
    }

    /// Nanoseconds since the UNIX epoch of `timestamp`, saturating at zero.
    pub fn timestamp_nanos(&self) -> u64 {
        self.timestamp
            .timestamp_nanos_opt()
            .and_then(|nanos| u64::try_from(nanos).ok())
            .unwrap_or_default()
    }
}
