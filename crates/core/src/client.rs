//! Instrumentation facade.
//!
//! [`MetricsClient`] is the handle application code records through. It
//! owns `Arc`s to a registry and an aggregator, merges configured global
//! tags under every call's tags, and never returns errors: invalid input is
//! dropped and logged by the accumulators.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use metricflow_core::{tags, MetricRegistry, MetricsClient};
//!
//! let registry = Arc::new(MetricRegistry::new());
//! let client = MetricsClient::new(Arc::clone(&registry))
//!     .with_global_tags(tags! { "service" => "api" });
//!
//! client.increment_counter("requests_total", 1.0, &tags! { "route" => "/login" });
//! {
//!     let _timer = client.start_timer("request_seconds", &tags! { "route" => "/login" });
//!     // timed work
//! }
//! assert_eq!(registry.snapshot().len(), 2);
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::aggregation::{AggregatedStats, AggregationType, Aggregator};
use crate::bus::{MetricBus, MetricEvent};
use crate::metrics::{Histogram, TagSet};
use crate::registry::MetricRegistry;

/// Cloneable recording handle.
#[derive(Debug, Clone)]
pub struct MetricsClient {
    registry: Arc<MetricRegistry>,
    aggregator: Arc<Aggregator>,
    bus: Option<Arc<MetricBus>>,
    global_tags: TagSet,
}

impl MetricsClient {
    pub fn new(registry: Arc<MetricRegistry>) -> Self {
        Self {
            registry,
            aggregator: Arc::new(Aggregator::new()),
            bus: None,
            global_tags: TagSet::new(),
        }
    }

    #[must_use]
    pub fn with_aggregator(mut self, aggregator: Arc<Aggregator>) -> Self {
        self.aggregator = aggregator;
        self
    }

    #[must_use]
    pub fn with_bus(mut self, bus: Arc<MetricBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Tags applied to every recording; call tags win on key clashes.
    #[must_use]
    pub fn with_global_tags(mut self, tags: TagSet) -> Self {
        self.global_tags = tags;
        self
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    pub fn increment_counter(&self, name: &str, delta: f64, tags: &TagSet) {
        self.registry.get_or_create_counter(name, "").inc(&self.tags(tags), delta);
    }

    pub fn set_gauge(&self, name: &str, value: f64, tags: &TagSet) {
        self.registry.get_or_create_gauge(name, "").set(&self.tags(tags), value);
    }

    pub fn record_histogram(&self, name: &str, value: f64, tags: &TagSet) {
        self.registry.get_or_create_histogram(name, "", None).observe(&self.tags(tags), value);
    }

    pub fn record_summary(&self, name: &str, value: f64, tags: &TagSet) {
        self.registry.get_or_create_summary(name, "", None, None).observe(&self.tags(tags), value);
    }

    /// Starts a timer that records elapsed seconds into histogram `name`
    /// when stopped or dropped.
    pub fn start_timer(&self, name: &str, tags: &TagSet) -> MetricTimer {
        MetricTimer {
            histogram: self.registry.get_or_create_histogram(name, "", None),
            tags: self.tags(tags),
            started: Instant::now(),
            recorded: false,
        }
    }

    /// Registers a sliding-window summary; first registration wins.
    pub fn create_sliding_window(
        &self,
        name: &str,
        description: &str,
        window: Duration,
        quantiles: Option<&[f64]>,
    ) {
        self.registry.get_or_create_sliding_window(name, description, window, quantiles);
    }

    /// Records into a sliding window created earlier with
    /// [`create_sliding_window`](Self::create_sliding_window).
    pub fn record_sliding_window(&self, name: &str, value: f64, tags: &TagSet) {
        match self.registry.sliding_window(name) {
            Some(window) => window.observe(&self.tags(tags), value),
            None => warn!(metric = name, "sliding window not registered, dropping observation"),
        }
    }

    /// Queues `event` on the attached bus; returns whether it was accepted.
    ///
    /// Without a bus the event is applied to the registry directly.
    pub fn publish(&self, mut event: MetricEvent) -> bool {
        event.tags = self.tags(&event.tags);
        match &self.bus {
            Some(bus) => bus.try_write(event),
            None => {
                event.apply_to(&self.registry);
                true
            }
        }
    }

    pub fn add_aggregated_value(&self, name: &str, value: f64, tags: &TagSet) {
        self.aggregator.add_value(name, value, &self.tags(tags));
    }

    pub fn aggregated_value(
        &self,
        name: &str,
        aggregation: AggregationType,
        tags: &TagSet,
    ) -> Option<f64> {
        self.aggregator.get_aggregated_value(name, aggregation, &self.tags(tags))
    }

    pub fn aggregated_stats(&self, name: &str, tags: &TagSet) -> Option<AggregatedStats> {
        self.aggregator.get_stats(name, &self.tags(tags))
    }

    fn tags(&self, tags: &TagSet) -> TagSet {
        tags.merged_over(&self.global_tags)
    }
}

/// Guard returned by [`MetricsClient::start_timer`].
#[derive(Debug)]
pub struct MetricTimer {
    histogram: Arc<Histogram>,
    tags: TagSet,
    started: Instant,
    recorded: bool,
}

impl MetricTimer {
    /// Records now and returns the elapsed time.
    pub fn stop(mut self) -> Duration {
        self.record()
    }

    /// Elapsed time without recording.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn record(&mut self) -> Duration {
        let elapsed = self.started.elapsed();
        if !self.recorded {
            self.recorded = true;
            self.histogram.observe(&self.tags, elapsed.as_secs_f64());
        }
        elapsed
    }
}

impl Drop for MetricTimer {
    fn drop(&mut self) {
        self.record();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> MetricsClient {
        MetricsClient::new(Arc::new(MetricRegistry::new()))
            .with_global_tags(TagSet::new().with("service", "api").with("env", "dev"))
    }

    /// Validates global tags merge under call tags.
    #[test]
    fn test_global_tags_merge() {
        let client = client();
        client.increment_counter("hits", 1.0, &TagSet::new().with("env", "prod"));

        let expected = TagSet::new().with("service", "api").with("env", "prod");
        let hits = client.registry().counter("hits").unwrap();
        assert!((hits.value(&expected) - 1.0).abs() < f64::EPSILON);
    }

    /// Validates the timer records exactly once.
    #[test]
    fn test_timer_records_once() {
        let client = client();
        let timer = client.start_timer("op_seconds", &TagSet::new());
        let elapsed = timer.stop();

        let histogram = client.registry().histogram("op_seconds").unwrap();
        let tags = TagSet::new().with("service", "api").with("env", "dev");
        let data = histogram.data(&tags).unwrap();
        assert_eq!(data.count, 1);
        assert!((data.sum - elapsed.as_secs_f64()).abs() < 1e-9);

        drop(client.start_timer("op_seconds", &TagSet::new()));
        assert_eq!(histogram.data(&tags).unwrap().count, 2);
    }

    /// Validates sliding windows must be created before recording.
    #[test]
    fn test_sliding_window_requires_creation() {
        let client = client();
        client.record_sliding_window("recent", 1.0, &TagSet::new());
        assert!(client.registry().sliding_window("recent").is_none());

        client.create_sliding_window("recent", "", Duration::from_secs(60), None);
        client.record_sliding_window("recent", 1.0, &TagSet::new());
        assert_eq!(client.registry().sliding_window("recent").unwrap().series_count(), 1);
    }

    /// Validates aggregator passthroughs use merged tags.
    #[test]
    fn test_aggregator_passthrough() {
        let client = client();
        client.add_aggregated_value("payload", 10.0, &TagSet::new());
        client.add_aggregated_value("payload", 30.0, &TagSet::new());
        let max = client.aggregated_value("payload", AggregationType::Max, &TagSet::new());
        assert_eq!(max, Some(30.0));
        assert_eq!(client.aggregated_stats("payload", &TagSet::new()).unwrap().count, 2);
    }

    /// Validates publish goes through the bus when attached.
    #[test]
    fn test_publish_through_bus() {
        let bus = Arc::new(MetricBus::with_capacity(4));
        let client = client().with_bus(Arc::clone(&bus));
        assert!(client.publish(MetricEvent::counter("jobs", 1.0, TagSet::new())));
        assert_eq!(bus.len(), 1);
        assert!(client.registry().counter("jobs").is_none());

        assert_eq!(bus.drain_into(client.registry(), 10), 1);
        assert!(client.registry().counter("jobs").is_some());
    }
}
