//! Bounded multi-producer/multi-consumer metric event channel.
//!
//! The [`MetricBus`] is an auxiliary ingress: producers that prefer queued
//! submission write [`MetricEvent`]s, and the flush path drains them into the
//! registry. It is not a general pub/sub system.
//!
//! **Admission**
//! - [`try_write`](MetricBus::try_write) never waits. When full it applies the
//!   bus's [`OverflowPolicy`]: `DropOldest` evicts the head to admit the new
//!   event, `DropNewest` rejects the incoming event. Drops are counted and
//!   never reported to the producer as errors.
//! - [`write`](MetricBus::write) waits for free capacity, or returns `false`
//!   if the cancellation token fires or the bus is completed first.
//!
//! **Completion**
//! - [`complete`](MetricBus::complete) rejects further writes and wakes all
//!   waiters. Buffered events stay readable; [`read`](MetricBus::read) yields
//!   `None` once the bus is completed and empty. A completed bus cannot be
//!   reopened.
//!
//! **Thread Safety**
//! - State lives behind one short-held mutex; waiting uses two
//!   [`Notify`](tokio::sync::Notify) handles so no lock is held across an
//!   await point.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use metricflow_domain::constants::BUS_SATURATION_PERCENT;
use metricflow_domain::{MetricKind, OverflowPolicy};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::metrics::TagSet;
use crate::registry::MetricRegistry;

/// Immutable metric submission travelling over the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEvent {
    pub name: String,
    pub kind: MetricKind,
    pub value: f64,
    pub tags: TagSet,
    pub timestamp: DateTime<Utc>,
}

impl MetricEvent {
    pub fn new(name: impl Into<String>, kind: MetricKind, value: f64, tags: TagSet) -> Self {
        Self { name: name.into(), kind, value, tags, timestamp: Utc::now() }
    }

    pub fn counter(name: impl Into<String>, delta: f64, tags: TagSet) -> Self {
        Self::new(name, MetricKind::Counter, delta, tags)
    }

    pub fn gauge(name: impl Into<String>, value: f64, tags: TagSet) -> Self {
        Self::new(name, MetricKind::Gauge, value, tags)
    }

    pub fn histogram(name: impl Into<String>, value: f64, tags: TagSet) -> Self {
        Self::new(name, MetricKind::Histogram, value, tags)
    }

    pub fn summary(name: impl Into<String>, value: f64, tags: TagSet) -> Self {
        Self::new(name, MetricKind::Summary, value, tags)
    }

    /// Records this event into `registry` with default metric settings.
    pub fn apply_to(&self, registry: &MetricRegistry) {
        match self.kind {
            MetricKind::Counter => {
                registry.get_or_create_counter(&self.name, "").inc(&self.tags, self.value);
            }
            MetricKind::Gauge => {
                registry.get_or_create_gauge(&self.name, "").set(&self.tags, self.value);
            }
            MetricKind::Histogram => {
                let histogram = registry.get_or_create_histogram(&self.name, "", None);
                histogram.observe(&self.tags, self.value);
            }
            MetricKind::Summary => registry
                .get_or_create_summary(&self.name, "", None, None)
                .observe(&self.tags, self.value),
        }
    }
}

/// Capacity and counters of a bus.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BusStatus {
    pub capacity: usize,
    pub current_count: usize,
    pub utilization_percent: f64,
    /// Whether utilization is at or above the saturation threshold.
    pub saturated: bool,
    pub total_written: u64,
    pub total_dropped: u64,
    pub total_read: u64,
    pub completed: bool,
}

#[derive(Debug)]
struct BusInner {
    queue: VecDeque<MetricEvent>,
    completed: bool,
}

/// Bounded MPMC queue of [`MetricEvent`]s.
#[derive(Debug)]
pub struct MetricBus {
    inner: Mutex<BusInner>,
    capacity: usize,
    policy: OverflowPolicy,
    readable: Notify,
    writable: Notify,
    total_written: AtomicU64,
    total_dropped: AtomicU64,
    total_read: AtomicU64,
}

impl MetricBus {
    /// Creates a bus holding at most `capacity` events (minimum 1).
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(BusInner {
                queue: VecDeque::with_capacity(capacity.min(16_384)),
                completed: false,
            }),
            capacity,
            policy,
            readable: Notify::new(),
            writable: Notify::new(),
            total_written: AtomicU64::new(0),
            total_dropped: AtomicU64::new(0),
            total_read: AtomicU64::new(0),
        }
    }

    /// A drop-oldest bus.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(capacity, OverflowPolicy::DropOldest)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Non-blocking write.
    ///
    /// Returns whether `event` is now buffered. `false` means the bus is
    /// completed or, under `DropNewest`, full.
    pub fn try_write(&self, event: MetricEvent) -> bool {
        let mut inner = self.inner.lock();
        if inner.completed {
            return false;
        }
        if inner.queue.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::DropOldest => {
                    inner.queue.pop_front();
                    self.total_dropped.fetch_add(1, Ordering::Relaxed);
                    trace!("bus full, dropped oldest event");
                }
                OverflowPolicy::DropNewest => {
                    self.total_dropped.fetch_add(1, Ordering::Relaxed);
                    trace!(metric = %event.name, "bus full, dropped incoming event");
                    return false;
                }
            }
        }
        inner.queue.push_back(event);
        drop(inner);
        self.total_written.fetch_add(1, Ordering::Relaxed);
        self.readable.notify_one();
        true
    }

    /// Waits for capacity and writes `event`.
    ///
    /// Returns `false` without writing when `cancel` fires or the bus is
    /// completed before space frees up.
    pub async fn write(&self, event: MetricEvent, cancel: &CancellationToken) -> bool {
        loop {
            let notified = self.writable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock();
                if inner.completed {
                    return false;
                }
                if inner.queue.len() < self.capacity {
                    inner.queue.push_back(event);
                    drop(inner);
                    self.total_written.fetch_add(1, Ordering::Relaxed);
                    self.readable.notify_one();
                    return true;
                }
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return false,
                () = &mut notified => {}
            }
        }
    }

    /// Pops the oldest event without waiting.
    pub fn try_read(&self) -> Option<MetricEvent> {
        let event = self.inner.lock().queue.pop_front();
        if event.is_some() {
            self.total_read.fetch_add(1, Ordering::Relaxed);
            self.writable.notify_one();
        }
        event
    }

    /// Waits for the next event; `None` once completed and drained.
    pub async fn read(&self) -> Option<MetricEvent> {
        loop {
            let notified = self.readable.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock();
                if let Some(event) = inner.queue.pop_front() {
                    drop(inner);
                    self.total_read.fetch_add(1, Ordering::Relaxed);
                    self.writable.notify_one();
                    return Some(event);
                }
                if inner.completed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Stream of events that ends after completion and drain.
    pub fn reader(self: &Arc<Self>) -> impl Stream<Item = MetricEvent> + Send + 'static {
        stream::unfold(Arc::clone(self), |bus| async move {
            let event = bus.read().await?;
            Some((event, bus))
        })
    }

    /// Pops up to `max` buffered events without waiting.
    pub fn drain(&self, max: usize) -> Vec<MetricEvent> {
        let events: Vec<MetricEvent> = {
            let mut inner = self.inner.lock();
            let take = max.min(inner.queue.len());
            inner.queue.drain(..take).collect()
        };
        if !events.is_empty() {
            self.total_read.fetch_add(events.len() as u64, Ordering::Relaxed);
            self.writable.notify_waiters();
        }
        events
    }

    /// Applies up to `max` buffered events to `registry`; returns how many.
    pub fn drain_into(&self, registry: &MetricRegistry, max: usize) -> usize {
        let events = self.drain(max);
        for event in &events {
            event.apply_to(registry);
        }
        if !events.is_empty() {
            debug!(events = events.len(), "applied bus events to registry");
        }
        events.len()
    }

    /// Stops accepting writes; buffered events remain readable.
    pub fn complete(&self) {
        let mut inner = self.inner.lock();
        if inner.completed {
            return;
        }
        inner.completed = true;
        drop(inner);
        debug!("metric bus completed");
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }

    pub fn is_completed(&self) -> bool {
        self.inner.lock().completed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status(&self) -> BusStatus {
        let (current_count, completed) = {
            let inner = self.inner.lock();
            (inner.queue.len(), inner.completed)
        };
        #[allow(clippy::cast_precision_loss)]
        let utilization_percent = current_count as f64 / self.capacity as f64 * 100.0;
        BusStatus {
            capacity: self.capacity,
            current_count,
            utilization_percent,
            saturated: utilization_percent >= BUS_SATURATION_PERCENT,
            total_written: self.total_written.load(Ordering::Relaxed),
            total_dropped: self.total_dropped.load(Ordering::Relaxed),
            total_read: self.total_read.load(Ordering::Relaxed),
            completed,
        }
    }
}
