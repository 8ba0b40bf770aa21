//! In-memory dead-letter queue for failed exports.
//!
//! A [`FailedMetric`] records one metric point that a sink could not accept
//! after its retry budget was spent. The [`DeadLetterQueue`] is a bounded
//! FIFO; when full, its [`OverflowPolicy`] decides what is lost:
//!
//! - `DropOldest` evicts the head record to admit the new one.
//! - `DropNewest` rejects the new record.
//!
//! Either way the loss is logged at `warn` and counted in
//! [`DeadLetterStats::total_dropped`].

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use metricflow_domain::OverflowPolicy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::registry::MetricPoint;

/// A point a sink failed to accept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedMetric {
    pub id: Uuid,
    pub point: MetricPoint,
    pub sink_name: String,
    /// Reprocessing attempts so far; zero on first failure.
    pub retry_count: u32,
    pub last_error: String,
    pub metadata: BTreeMap<String, String>,
    pub failed_at: DateTime<Utc>,
}

impl FailedMetric {
    pub fn new(
        point: MetricPoint,
        sink_name: impl Into<String>,
        last_error: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            point,
            sink_name: sink_name.into(),
            retry_count: 0,
            last_error: last_error.into(),
            metadata: BTreeMap::new(),
            failed_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Result of [`DeadLetterQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    /// Accepted after evicting the oldest record.
    EvictedOldest,
    /// Refused because the queue is full.
    Rejected,
}

/// Queue depth and lifetime counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DeadLetterStats {
    pub count: usize,
    pub capacity: usize,
    pub total_enqueued: u64,
    pub total_dequeued: u64,
    pub total_dropped: u64,
}

/// Bounded FIFO of [`FailedMetric`]s.
#[derive(Debug)]
pub struct DeadLetterQueue {
    records: Mutex<VecDeque<FailedMetric>>,
    capacity: usize,
    policy: OverflowPolicy,
    total_enqueued: AtomicU64,
    total_dequeued: AtomicU64,
    total_dropped: AtomicU64,
}

impl DeadLetterQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Mutex::new(VecDeque::new()),
            capacity,
            policy,
            total_enqueued: AtomicU64::new(0),
            total_dequeued: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn enqueue(&self, record: FailedMetric) -> EnqueueOutcome {
        let mut records = self.records.lock();
        let mut outcome = EnqueueOutcome::Accepted;
        if records.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::DropOldest => {
                    if let Some(evicted) = records.pop_front() {
                        warn!(
                            sink = %evicted.sink_name,
                            metric = %evicted.point.name,
                            "dead-letter queue full, dropping oldest record"
                        );
                    }
                    outcome = EnqueueOutcome::EvictedOldest;
                }
                OverflowPolicy::DropNewest => {
                    drop(records);
                    self.total_dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        sink = %record.sink_name,
                        metric = %record.point.name,
                        "dead-letter queue full, rejecting record"
                    );
                    return EnqueueOutcome::Rejected;
                }
            }
        }
        records.push_back(record);
        drop(records);
        if outcome == EnqueueOutcome::EvictedOldest {
            self.total_dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.total_enqueued.fetch_add(1, Ordering::Relaxed);
        outcome
    }

    pub fn try_dequeue(&self) -> Option<FailedMetric> {
        let record = self.records.lock().pop_front();
        if record.is_some() {
            self.total_dequeued.fetch_add(1, Ordering::Relaxed);
        }
        record
    }

    /// Pops up to `max` records in FIFO order.
    pub fn dequeue_batch(&self, max: usize) -> Vec<FailedMetric> {
        let batch: Vec<FailedMetric> = {
            let mut records = self.records.lock();
            let take = max.min(records.len());
            records.drain(..take).collect()
        };
        self.total_dequeued.fetch_add(batch.len() as u64, Ordering::Relaxed);
        batch
    }

    /// Copies the queued records without removing them.
    pub fn peek_all(&self) -> Vec<FailedMetric> {
        self.records.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discards every record; returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut records = self.records.lock();
        let removed = records.len();
        records.clear();
        removed
    }

    pub fn stats(&self) -> DeadLetterStats {
        DeadLetterStats {
            count: self.len(),
            capacity: self.capacity,
            total_enqueued: self.total_enqueued.load(Ordering::Relaxed),
            total_dequeued: self.total_dequeued.load(Ordering::Relaxed),
            total_dropped: self.total_dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::TagSet;
    use crate::registry::PointValue;

    fn failed(name: &str) -> FailedMetric {
        let point = MetricPoint {
            name: name.to_string(),
            description: String::new(),
            tags: TagSet::new(),
            value: PointValue::Counter { value: 1.0 },
        };
        FailedMetric::new(point, "StatsD", "connection refused")
    }

    /// Validates FIFO order and stats.
    #[test]
    fn test_fifo_and_stats() {
        let dlq = DeadLetterQueue::new(10, OverflowPolicy::DropOldest);
        dlq.enqueue(failed("a"));
        dlq.enqueue(failed("b"));

        assert_eq!(dlq.stats().count, 2);
        assert_eq!(dlq.stats().capacity, 10);
        assert_eq!(dlq.try_dequeue().map(|r| r.point.name), Some("a".to_string()));
        assert_eq!(dlq.try_dequeue().map(|r| r.point.name), Some("b".to_string()));
        assert!(dlq.try_dequeue().is_none());
        assert_eq!(dlq.stats().total_dequeued, 2);
    }

    /// Validates drop-oldest overflow evicts the head and counts it.
    #[test]
    fn test_drop_oldest_overflow() {
        let dlq = DeadLetterQueue::new(2, OverflowPolicy::DropOldest);
        dlq.enqueue(failed("a"));
        dlq.enqueue(failed("b"));
        assert_eq!(dlq.enqueue(failed("c")), EnqueueOutcome::EvictedOldest);

        let names: Vec<_> = dlq.dequeue_batch(10).into_iter().map(|r| r.point.name).collect();
        assert_eq!(names, vec!["b", "c"]);
        assert_eq!(dlq.stats().total_dropped, 1);
    }

    /// Validates reject-new overflow keeps existing records.
    #[test]
    fn test_reject_new_overflow() {
        let dlq = DeadLetterQueue::new(1, OverflowPolicy::DropNewest);
        assert_eq!(dlq.enqueue(failed("a")), EnqueueOutcome::Accepted);
        assert_eq!(dlq.enqueue(failed("b")), EnqueueOutcome::Rejected);
        assert_eq!(dlq.peek_all()[0].point.name, "a");
        assert_eq!(dlq.stats().total_dropped, 1);
        assert_eq!(dlq.stats().total_enqueued, 1);
    }

    /// Validates new records start with zero retries.
    #[test]
    fn test_new_record_defaults() {
        let record = failed("a").with_metadata("reason", "timeout");
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.metadata.get("reason").map(String::as_str), Some("timeout"));
    }
}
