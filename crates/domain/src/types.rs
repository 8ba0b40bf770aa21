//! Core value types shared by every layer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The four exported metric kinds.
///
/// Sliding-window summaries are stored separately but export as
/// [`MetricKind::Summary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Monotonically non-decreasing total.
    Counter,
    /// Last-write-wins value.
    Gauge,
    /// Cumulative bucketed distribution.
    Histogram,
    /// Quantiles over recent observations.
    Summary,
}

impl MetricKind {
    /// Lower-case name as used in exposition formats.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Histogram => "histogram",
            Self::Summary => "summary",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queue admission policy when a bounded buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest buffered item to admit the new one.
    #[default]
    DropOldest,
    /// Reject the incoming item and keep the buffer as is.
    DropNewest,
}
