//! Fixed-capacity window of `f64` samples with nearest-rank quantiles.
//!
//! A [`SampleWindow`] keeps the most recent `capacity` observations. When
//! full, pushing discards the oldest sample. Quantiles are computed by
//! nearest rank over one sorted copy of the retained samples, so for a single
//! call to [`quantiles`](SampleWindow::quantiles) the results are
//! non-decreasing in the requested quantile.
//!
//! # Complexity
//! - `push`, `len`, `is_empty`, `clear` are **O(1)**.
//! - `quantile` and `quantiles` are **O(n log n)** in the retained samples.

use std::collections::VecDeque;

/// Bounded FIFO of samples that overwrites the oldest entry when full.
///
/// # Examples
///
/// ```rust
/// use metricflow_common::collections::SampleWindow;
///
/// let mut window = SampleWindow::new(3);
/// for v in [1.0, 2.0, 3.0, 4.0] {
///     window.push(v);
/// }
/// assert_eq!(window.len(), 3);
/// assert_eq!(window.quantile(0.0), Some(2.0));
/// assert_eq!(window.quantile(1.0), Some(4.0));
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct SampleWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl SampleWindow {
    /// Creates a window holding at most `capacity` samples (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { samples: VecDeque::with_capacity(capacity.min(4_096)), capacity }
    }

    /// Appends a sample, evicting the oldest one when full.
    pub fn push(&mut self, value: f64) {
        if self.samples.len() >= self.capacity {
            let _ = self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Number of retained samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no samples are retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Maximum number of retained samples.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drops all samples.
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Iterates samples from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.samples.iter()
    }

    /// Retained samples in ascending order.
    #[must_use]
    pub fn sorted(&self) -> Vec<f64> {
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        sorted
    }

    /// Nearest-rank quantile `q` in `[0, 1]`, or `None` when empty.
    #[must_use]
    pub fn quantile(&self, q: f64) -> Option<f64> {
        nearest_rank(&self.sorted(), q)
    }

    /// Several quantiles computed over the same sorted copy.
    ///
    /// Returns `(q, value)` pairs in the order requested, or an empty vector
    /// when no samples are retained.
    #[must_use]
    pub fn quantiles(&self, qs: &[f64]) -> Vec<(f64, f64)> {
        let sorted = self.sorted();
        qs.iter().filter_map(|&q| nearest_rank(&sorted, q).map(|v| (q, v))).collect()
    }
}

impl Default for SampleWindow {
    fn default() -> Self {
        Self::new(1_024)
    }
}

/// Nearest-rank quantile over an ascending slice.
///
/// `q` is clamped to `[0, 1]`; `q = 0` yields the minimum.
#[must_use]
pub fn nearest_rank(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() || q.is_nan() {
        return None;
    }
    let q = q.clamp(0.0, 1.0);
    let n = sorted.len();
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let rank = (q * n as f64).ceil() as usize;
    sorted.get(rank.clamp(1, n) - 1).copied()
}
