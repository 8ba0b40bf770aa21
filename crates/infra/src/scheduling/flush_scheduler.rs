//! Periodic flush of the registry to every enabled sink.
//!
//! Each tick:
//!
//! 1. drains the attached [`MetricBus`] (if any) into the registry,
//! 2. takes one [`RegistrySnapshot`],
//! 3. exports it to every enabled sink concurrently, each sink behind its
//!    circuit breaker, the retry policy and a per-attempt timeout,
//! 4. dead-letters one [`FailedMetric`] per point for every sink that failed.
//!
//! A failing or slow sink never delays the others. A tick that panics is
//! logged and the next tick runs on schedule.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use metricflow_common::resilience::RetryPolicy;
//! use metricflow_core::{DeadLetterQueue, MetricRegistry};
//! use metricflow_domain::{MetricsOptions, OverflowPolicy};
//! use metricflow_infra::resilience::SinkCircuitBreakerManager;
//! use metricflow_infra::scheduling::{FlushSchedulerConfig, MetricFlushScheduler};
//!
//! # async fn example() -> metricflow_domain::Result<()> {
//! let options = MetricsOptions::default();
//! let registry = Arc::new(MetricRegistry::new());
//! let scheduler = MetricFlushScheduler::new(
//!     Arc::clone(&registry),
//!     metricflow_infra::exporters::build_sinks(&options)?,
//!     Arc::new(SinkCircuitBreakerManager::disabled()),
//!     RetryPolicy::default(),
//!     FlushSchedulerConfig::from_options(&options),
//! )
//! .with_dead_letter_queue(Arc::new(DeadLetterQueue::new(1_000, OverflowPolicy::DropOldest)));
//!
//! scheduler.start().await?;
//! // ... application runs ...
//! scheduler.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use metricflow_common::resilience::RetryPolicy;
use metricflow_core::{
    DeadLetterQueue, EnqueueOutcome, FailedMetric, MetricBus, MetricRegistry, MetricsSink,
    RegistrySnapshot, SinkError,
};
use metricflow_domain::constants::{META_ATTEMPTS, META_FAILED_AT, META_REASON};
use metricflow_domain::MetricsOptions;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::error::SchedulerResult;
use super::lifecycle::{panic_message, TaskSlot};
use crate::resilience::SinkCircuitBreakerManager;

/// Configuration for the flush scheduler
#[derive(Debug, Clone)]
pub struct FlushSchedulerConfig {
    /// Time between ticks
    pub interval: Duration,
    /// Limit for a single export attempt
    pub export_timeout: Duration,
    /// How long `stop` waits for an in-flight tick before cancelling it
    pub stop_timeout: Duration,
    /// Most bus events applied per tick
    pub drain_batch: usize,
}

impl Default for FlushSchedulerConfig {
    fn default() -> Self {
        Self::from_options(&MetricsOptions::default())
    }
}

impl FlushSchedulerConfig {
    pub fn from_options(options: &MetricsOptions) -> Self {
        Self {
            interval: options.flush_interval(),
            export_timeout: options.export_timeout(),
            stop_timeout: options.export_timeout() + Duration::from_secs(5),
            drain_batch: options.bus.capacity,
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Points in the exported snapshot
    pub points: usize,
    /// Bus events applied to the registry before the snapshot
    pub drained_events: usize,
    /// Sinks that accepted the snapshot
    pub succeeded: Vec<String>,
    /// Sinks that did not
    pub failed: Vec<String>,
    /// Records accepted by the dead-letter queue
    pub dead_lettered: usize,
}

/// Final result of one sink's export sequence.
#[derive(Debug)]
enum SinkOutcome {
    Exported,
    Failed { reason: &'static str, error: String, attempts: u32 },
}

/// Everything a tick needs; cheap to clone into the background task.
#[derive(Clone)]
struct FlushContext {
    registry: Arc<MetricRegistry>,
    sinks: Arc<[Arc<dyn MetricsSink>]>,
    breakers: Arc<SinkCircuitBreakerManager>,
    retry: RetryPolicy,
    dead_letter_queue: Option<Arc<DeadLetterQueue>>,
    bus: Option<Arc<MetricBus>>,
    config: FlushSchedulerConfig,
    /// Serializes timer ticks with manual flushes.
    flush_lock: Arc<tokio::sync::Mutex<()>>,
}

/// Timer-driven exporter of registry snapshots.
pub struct MetricFlushScheduler {
    context: FlushContext,
    /// Cancels in-flight exports; fired only when `stop` times out.
    export_cancel: parking_lot::Mutex<CancellationToken>,
    task: TaskSlot,
}

impl std::fmt::Debug for MetricFlushScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sinks: Vec<&str> = self.context.sinks.iter().map(|s| s.name()).collect();
        f.debug_struct("MetricFlushScheduler")
            .field("sinks", &sinks)
            .field("config", &self.context.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl MetricFlushScheduler {
    pub fn new(
        registry: Arc<MetricRegistry>,
        sinks: Vec<Arc<dyn MetricsSink>>,
        breakers: Arc<SinkCircuitBreakerManager>,
        retry: RetryPolicy,
        config: FlushSchedulerConfig,
    ) -> Self {
        Self {
            context: FlushContext {
                registry,
                sinks: sinks.into(),
                breakers,
                retry,
                dead_letter_queue: None,
                bus: None,
                config,
                flush_lock: Arc::new(tokio::sync::Mutex::new(())),
            },
            export_cancel: parking_lot::Mutex::new(CancellationToken::new()),
            task: TaskSlot::new("flush_scheduler"),
        }
    }

    /// Routes failed points to `queue`. Without a queue they are logged and
    /// discarded.
    #[must_use]
    pub fn with_dead_letter_queue(mut self, queue: Arc<DeadLetterQueue>) -> Self {
        self.context.dead_letter_queue = Some(queue);
        self
    }

    /// Drains `bus` into the registry at the start of every tick.
    #[must_use]
    pub fn with_bus(mut self, bus: Arc<MetricBus>) -> Self {
        self.context.bus = Some(bus);
        self
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.context.registry
    }

    pub fn sinks(&self) -> &[Arc<dyn MetricsSink>] {
        &self.context.sinks
    }

    pub fn breakers(&self) -> &Arc<SinkCircuitBreakerManager> {
        &self.context.breakers
    }

    pub fn dead_letter_queue(&self) -> Option<&Arc<DeadLetterQueue>> {
        self.context.dead_letter_queue.as_ref()
    }

    pub fn bus(&self) -> Option<&Arc<MetricBus>> {
        self.context.bus.as_ref()
    }

    pub fn config(&self) -> &FlushSchedulerConfig {
        &self.context.config
    }

    /// Start the scheduler
    ///
    /// Spawns a background task that flushes every `interval`; the first
    /// flush happens one interval after start.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::AlreadyRunning` if the scheduler is already
    /// running.
    #[instrument(skip(self))]
    pub async fn start(&self) -> SchedulerResult<()> {
        let export_cancel = CancellationToken::new();
        let loop_export_cancel = export_cancel.clone();
        let context = self.context.clone();

        self.task
            .start(move |cancel| async move {
                Self::flush_loop(context, cancel, loop_export_cancel).await
            })
            .await?;
        *self.export_cancel.lock() = export_cancel;

        info!(
            interval_ms = self.context.config.interval.as_millis() as u64,
            sinks = self.context.sinks.len(),
            "Flush scheduler started"
        );
        Ok(())
    }

    /// Stop the scheduler gracefully
    ///
    /// Cancels the timer and waits for an in-flight tick to finish. If the
    /// tick outlives `stop_timeout`, its exports are cancelled.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::NotRunning` if the scheduler is not running
    /// and `SchedulerError::Timeout` if the tick had to be aborted.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> SchedulerResult<()> {
        info!("Stopping flush scheduler");
        let export_cancel = self.export_cancel.lock().clone();
        self.task.stop(self.context.config.stop_timeout, move || export_cancel.cancel()).await?;
        info!("Flush scheduler stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    /// Runs one tick now, independent of the timer.
    pub async fn flush_once(&self) -> FlushReport {
        let cancel = self.export_cancel.lock().clone();
        self.context.flush(&cancel).await
    }

    async fn flush_loop(
        context: FlushContext,
        cancel: CancellationToken,
        export_cancel: CancellationToken,
    ) {
        let interval = context.config.interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("Flush loop cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    let tick = AssertUnwindSafe(context.flush(&export_cancel)).catch_unwind().await;
                    if let Err(panic) = tick {
                        error!(error = %panic_message(panic.as_ref()), "Flush tick panicked");
                    }
                }
            }
        }
    }
}

impl FlushContext {
    async fn flush(&self, cancel: &CancellationToken) -> FlushReport {
        let _guard = self.flush_lock.lock().await;
        let started = Instant::now();

        let drained_events = self
            .bus
            .as_ref()
            .map_or(0, |bus| bus.drain_into(&self.registry, self.config.drain_batch));
        let snapshot = Arc::new(self.registry.snapshot());
        let mut report =
            FlushReport { points: snapshot.len(), drained_events, ..FlushReport::default() };

        let mut exports = JoinSet::new();
        for sink in self.sinks.iter().filter(|sink| sink.is_enabled()) {
            let sink = Arc::clone(sink);
            let snapshot = Arc::clone(&snapshot);
            let breakers = Arc::clone(&self.breakers);
            let retry = self.retry.clone();
            let cancel = cancel.clone();
            let timeout = self.config.export_timeout;
            exports.spawn(async move {
                let outcome =
                    export_to_sink(sink.as_ref(), &snapshot, &breakers, &retry, &cancel, timeout)
                        .await;
                (sink.name().to_string(), outcome)
            });
        }

        while let Some(joined) = exports.join_next().await {
            let (sink, outcome) = match joined {
                Ok(result) => result,
                Err(err) => {
                    error!(error = %err, "Sink export task failed");
                    continue;
                }
            };
            match outcome {
                SinkOutcome::Exported => report.succeeded.push(sink),
                SinkOutcome::Failed { reason, error, attempts } => {
                    report.dead_lettered +=
                        self.dead_letter(&snapshot, &sink, reason, &error, attempts);
                    report.failed.push(sink);
                }
            }
        }

        report.succeeded.sort();
        report.failed.sort();
        info!(
            points = report.points,
            drained = report.drained_events,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            dead_lettered = report.dead_lettered,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Flush completed"
        );
        report
    }

    /// Enqueues one record per point; returns how many were accepted.
    fn dead_letter(
        &self,
        snapshot: &RegistrySnapshot,
        sink: &str,
        reason: &str,
        error: &str,
        attempts: u32,
    ) -> usize {
        let Some(queue) = &self.dead_letter_queue else {
            warn!(
                sink,
                points = snapshot.len(),
                reason,
                "No dead-letter queue, discarding failed points"
            );
            return 0;
        };

        let failed_at = Utc::now().to_rfc3339();
        let mut accepted = 0;
        for point in &snapshot.points {
            let record = FailedMetric::new(point.clone(), sink, error)
                .with_metadata(META_FAILED_AT, failed_at.clone())
                .with_metadata(META_ATTEMPTS, attempts.to_string())
                .with_metadata(META_REASON, reason);
            if queue.enqueue(record) != EnqueueOutcome::Rejected {
                accepted += 1;
            }
        }

        warn!(sink, reason, error, accepted, "Dead-lettered failed points");
        accepted
    }
}

/// Runs one sink's export sequence: breaker check, retries, breaker outcome.
async fn export_to_sink(
    sink: &dyn MetricsSink,
    snapshot: &RegistrySnapshot,
    breakers: &SinkCircuitBreakerManager,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
    timeout: Duration,
) -> SinkOutcome {
    let name = sink.name();
    if !breakers.allow_request(name) {
        debug!(sink = name, "Circuit open, skipping export");
        return SinkOutcome::Failed {
            reason: "circuit_open",
            error: format!("circuit breaker open for sink {name}"),
            attempts: 0,
        };
    }

    // Dropped without an outcome (cancelled, or the tick itself aborted), the
    // guard gives a half-open probe back to the breaker.
    let guard = BreakerGuard { breakers, sink: name, armed: true };
    let outcome = retry
        .execute_if(
            move || export_attempt(sink, snapshot, cancel, timeout),
            SinkError::is_retryable,
            cancel,
        )
        .await;

    if outcome.success {
        guard.disarm();
        breakers.record_success(name);
        debug!(sink = name, attempts = outcome.attempts, "Export succeeded");
        return SinkOutcome::Exported;
    }

    let reason = if outcome.cancelled {
        drop(guard);
        "cancelled"
    } else {
        guard.disarm();
        breakers.record_failure(name);
        if outcome.non_retryable {
            "non_retryable"
        } else if matches!(outcome.last_error, Some(SinkError::Timeout(_))) {
            "timeout"
        } else {
            "retries_exhausted"
        }
    };
    let error = outcome
        .last_error
        .map_or_else(|| SinkError::Cancelled.to_string(), |err| err.to_string());
    warn!(sink = name, attempts = outcome.attempts, reason, error = %error, "Export failed");
    SinkOutcome::Failed { reason, error, attempts: outcome.attempts }
}

struct BreakerGuard<'a> {
    breakers: &'a SinkCircuitBreakerManager,
    sink: &'a str,
    armed: bool,
}

impl BreakerGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for BreakerGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breakers.release_probe(self.sink);
        }
    }
}

/// One bounded attempt; a panicking sink counts as a transport failure.
pub(crate) async fn export_attempt(
    sink: &dyn MetricsSink,
    snapshot: &RegistrySnapshot,
    cancel: &CancellationToken,
    timeout: Duration,
) -> Result<(), SinkError> {
    let export = AssertUnwindSafe(sink.export(snapshot, cancel)).catch_unwind();
    match tokio::time::timeout(timeout, export).await {
        Err(_) => Err(SinkError::Timeout(timeout)),
        Ok(Err(panic)) => Err(SinkError::Transport(format!(
            "sink panicked: {}",
            panic_message(panic.as_ref())
        ))),
        Ok(Ok(result)) => result,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use metricflow_common::resilience::{CircuitState, MockClock};
    use metricflow_core::{tags, MetricEvent};
    use metricflow_domain::{BreakerThresholds, CircuitBreakerOptions, OverflowPolicy};

    use super::*;

    /// Sink that fails its first `failures` calls.
    struct FlakySink {
        name: &'static str,
        failures: u32,
        error: SinkError,
        calls: AtomicU32,
    }

    impl FlakySink {
        fn new(name: &'static str, failures: u32) -> Self {
            Self {
                name,
                failures,
                error: SinkError::Transport("down".to_string()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MetricsSink for FlakySink {
        fn name(&self) -> &str {
            self.name
        }

        fn is_enabled(&self) -> bool {
            true
        }

        async fn export(
            &self,
            _: &RegistrySnapshot,
            _: &CancellationToken,
        ) -> Result<(), SinkError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(self.error.clone())
            } else {
                Ok(())
            }
        }
    }

    struct PanickingSink;

    #[async_trait]
    impl MetricsSink for PanickingSink {
        fn name(&self) -> &str {
            "Panicky"
        }

        fn is_enabled(&self) -> bool {
            true
        }

        async fn export(
            &self,
            _: &RegistrySnapshot,
            _: &CancellationToken,
        ) -> Result<(), SinkError> {
            panic!("exporter bug")
        }
    }

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(max_retries)
            .initial_delay(Duration::from_millis(1))
            .jitter_percent(0.0)
            .build()
            .unwrap()
    }

    fn registry_with_points() -> Arc<MetricRegistry> {
        let registry = Arc::new(MetricRegistry::new());
        registry.get_or_create_counter("requests_total", "").inc(&tags! { "env" => "prod" }, 7.0);
        registry.get_or_create_gauge("queue_depth", "").set(&tags! {}, 3.0);
        registry
    }

    fn scheduler(
        registry: Arc<MetricRegistry>,
        sinks: Vec<Arc<dyn MetricsSink>>,
        breakers: SinkCircuitBreakerManager,
        retry: RetryPolicy,
    ) -> MetricFlushScheduler {
        let config = FlushSchedulerConfig::default();
        MetricFlushScheduler::new(registry, sinks, Arc::new(breakers), retry, config)
            .with_dead_letter_queue(Arc::new(DeadLetterQueue::new(100, OverflowPolicy::DropOldest)))
    }

    /// Validates a failing sink neither blocks nor fails a healthy one.
    #[tokio::test]
    async fn test_sinks_are_isolated() {
        let healthy = Arc::new(FlakySink::new("Healthy", 0));
        let broken = Arc::new(FlakySink::new("Broken", u32::MAX));
        let scheduler = scheduler(
            registry_with_points(),
            vec![healthy.clone() as Arc<dyn MetricsSink>, broken.clone()],
            SinkCircuitBreakerManager::disabled(),
            fast_retry(2),
        );

        let report = scheduler.flush_once().await;

        assert_eq!(report.points, 2);
        assert_eq!(report.succeeded, vec!["Healthy".to_string()]);
        assert_eq!(report.failed, vec!["Broken".to_string()]);
        assert_eq!(report.dead_lettered, 2);
        assert_eq!(healthy.calls(), 1);
        assert_eq!(broken.calls(), 3);
    }

    /// Validates dead-lettered records carry sink, reason and attempts.
    #[tokio::test]
    async fn test_dead_letter_metadata() {
        let broken = Arc::new(FlakySink::new("Broken", u32::MAX));
        let scheduler = scheduler(
            registry_with_points(),
            vec![broken as Arc<dyn MetricsSink>],
            SinkCircuitBreakerManager::disabled(),
            fast_retry(1),
        );

        scheduler.flush_once().await;

        let records = scheduler.dead_letter_queue().unwrap().peek_all();
        assert_eq!(records.len(), 2);
        for record in &records {
            assert_eq!(record.sink_name, "Broken");
            assert_eq!(record.retry_count, 0);
            assert_eq!(
                record.metadata.get(META_REASON).map(String::as_str),
                Some("retries_exhausted")
            );
            assert_eq!(record.metadata.get(META_ATTEMPTS).map(String::as_str), Some("2"));
            assert!(record.metadata.contains_key(META_FAILED_AT));
        }
    }

    /// Validates non-retryable errors are not retried.
    #[tokio::test]
    async fn test_non_retryable_error_skips_retries() {
        let mut sink = FlakySink::new("Strict", u32::MAX);
        sink.error = SinkError::Encode("bad payload".to_string());
        let sink = Arc::new(sink);
        let scheduler = scheduler(
            registry_with_points(),
            vec![sink.clone() as Arc<dyn MetricsSink>],
            SinkCircuitBreakerManager::disabled(),
            fast_retry(3),
        );

        scheduler.flush_once().await;

        assert_eq!(sink.calls(), 1);
        let record = scheduler.dead_letter_queue().unwrap().try_dequeue().unwrap();
        assert_eq!(record.metadata.get(META_REASON).map(String::as_str), Some("non_retryable"));
    }

    /// Validates an open breaker short-circuits the sink.
    #[tokio::test]
    async fn test_open_breaker_skips_sink() {
        let broken = Arc::new(FlakySink::new("Broken", u32::MAX));
        let options = CircuitBreakerOptions {
            default: BreakerThresholds { failure_threshold: 2, open_duration_seconds: 60 },
            ..CircuitBreakerOptions::default()
        };
        let scheduler = scheduler(
            registry_with_points(),
            vec![broken.clone() as Arc<dyn MetricsSink>],
            SinkCircuitBreakerManager::new(options).unwrap(),
            RetryPolicy::no_retry(),
        );

        scheduler.flush_once().await;
        scheduler.flush_once().await;
        assert_eq!(scheduler.breakers().state("Broken"), CircuitState::Open);
        assert_eq!(broken.calls(), 2);

        let report = scheduler.flush_once().await;
        assert_eq!(broken.calls(), 2);
        assert_eq!(report.failed, vec!["Broken".to_string()]);

        let last = scheduler.dead_letter_queue().unwrap().peek_all().pop().unwrap();
        assert_eq!(last.metadata.get(META_REASON).map(String::as_str), Some("circuit_open"));
        assert_eq!(last.metadata.get(META_ATTEMPTS).map(String::as_str), Some("0"));
    }

    /// Validates a panicking sink is contained and dead-lettered.
    #[tokio::test]
    async fn test_panicking_sink_is_contained() {
        let healthy = Arc::new(FlakySink::new("Healthy", 0));
        let scheduler = scheduler(
            registry_with_points(),
            vec![Arc::new(PanickingSink) as Arc<dyn MetricsSink>, healthy.clone()],
            SinkCircuitBreakerManager::disabled(),
            RetryPolicy::no_retry(),
        );

        let report = scheduler.flush_once().await;

        assert_eq!(report.succeeded, vec!["Healthy".to_string()]);
        assert_eq!(report.failed, vec!["Panicky".to_string()]);
        let record = scheduler.dead_letter_queue().unwrap().try_dequeue().unwrap();
        assert!(record.last_error.contains("exporter bug"));
    }

    /// Validates bus events are drained before the snapshot.
    #[tokio::test]
    async fn test_bus_is_drained_into_snapshot() {
        let registry = Arc::new(MetricRegistry::new());
        let bus = Arc::new(MetricBus::new(16, OverflowPolicy::DropOldest));
        bus.try_write(MetricEvent::counter("jobs_total", 2.0, tags! {}));
        bus.try_write(MetricEvent::counter("jobs_total", 3.0, tags! {}));
        let scheduler = scheduler(
            Arc::clone(&registry),
            vec![Arc::new(FlakySink::new("Healthy", 0)) as Arc<dyn MetricsSink>],
            SinkCircuitBreakerManager::disabled(),
            RetryPolicy::no_retry(),
        )
        .with_bus(bus);

        let report = scheduler.flush_once().await;

        assert_eq!(report.drained_events, 2);
        assert_eq!(report.points, 1);
        assert_eq!(registry.counter("jobs_total").unwrap().value(&tags! {}), 5.0);
    }

    /// Validates a slow sink times out and is reported as such.
    #[tokio::test]
    async fn test_slow_sink_times_out() {
        struct SlowSink;

        #[async_trait]
        impl MetricsSink for SlowSink {
            fn name(&self) -> &str {
                "Slow"
            }

            fn is_enabled(&self) -> bool {
                true
            }

            async fn export(
            &self,
            _: &RegistrySnapshot,
            _: &CancellationToken,
        ) -> Result<(), SinkError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        }

        let config = FlushSchedulerConfig {
            export_timeout: Duration::from_millis(20),
            ..FlushSchedulerConfig::default()
        };
        let scheduler = MetricFlushScheduler::new(
            registry_with_points(),
            vec![Arc::new(SlowSink) as Arc<dyn MetricsSink>],
            Arc::new(SinkCircuitBreakerManager::disabled()),
            RetryPolicy::no_retry(),
            config,
        )
        .with_dead_letter_queue(Arc::new(DeadLetterQueue::new(10, OverflowPolicy::DropOldest)));

        let report = scheduler.flush_once().await;

        assert_eq!(report.failed, vec!["Slow".to_string()]);
        let record = scheduler.dead_letter_queue().unwrap().try_dequeue().unwrap();
        assert_eq!(record.metadata.get(META_REASON).map(String::as_str), Some("timeout"));
    }

    /// Sink that never finishes until its export is cancelled.
    struct HangingSink;

    #[async_trait]
    impl MetricsSink for HangingSink {
        fn name(&self) -> &str {
            "Hanging"
        }

        fn is_enabled(&self) -> bool {
            true
        }

        async fn export(
            &self,
            _: &RegistrySnapshot,
            cancel: &CancellationToken,
        ) -> Result<(), SinkError> {
            cancel.cancelled().await;
            Err(SinkError::Cancelled)
        }
    }

    fn half_open_breakers(clock: &Arc<MockClock>) -> SinkCircuitBreakerManager {
        let options = CircuitBreakerOptions {
            default: BreakerThresholds { failure_threshold: 1, open_duration_seconds: 1 },
            ..CircuitBreakerOptions::default()
        };
        let breakers = SinkCircuitBreakerManager::with_clock(options, clock.clone()).unwrap();
        breakers.record_failure("Hanging");
        clock.advance(Duration::from_secs(2));
        breakers
    }

    /// Validates a cancelled half-open probe does not wedge the breaker.
    ///
    /// Assertions:
    /// - The cancelled export is reported as `cancelled`
    /// - Neither success nor failure is recorded for it
    /// - The breaker admits a fresh probe afterwards
    #[tokio::test]
    async fn test_cancelled_export_does_not_wedge_breaker() {
        let clock = Arc::new(MockClock::new());
        let breakers = half_open_breakers(&clock);
        let snapshot = registry_with_points().snapshot();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let outcome = export_to_sink(
            &HangingSink,
            &snapshot,
            &breakers,
            &RetryPolicy::no_retry(),
            &cancel,
            Duration::from_secs(5),
        )
        .await;

        assert!(matches!(outcome, SinkOutcome::Failed { reason: "cancelled", attempts: 1, .. }));
        assert_eq!(breakers.consecutive_failures("Hanging"), 1);

        clock.advance(Duration::from_secs(86_400));
        assert_eq!(breakers.state("Hanging"), CircuitState::HalfOpen);
        assert!(breakers.allow_request("Hanging"));
        breakers.record_success("Hanging");
        assert_eq!(breakers.state("Hanging"), CircuitState::Closed);
    }

    /// Validates an export aborted mid-probe also releases the probe.
    #[tokio::test]
    async fn test_aborted_export_does_not_wedge_breaker() {
        let clock = Arc::new(MockClock::new());
        let breakers = half_open_breakers(&clock);
        let snapshot = registry_with_points().snapshot();
        let cancel = CancellationToken::new();
        let retry = RetryPolicy::no_retry();

        let export = export_to_sink(
            &HangingSink,
            &snapshot,
            &breakers,
            &retry,
            &cancel,
            Duration::from_secs(5),
        );
        assert!(tokio::time::timeout(Duration::from_millis(20), export).await.is_err());

        assert!(breakers.allow_request("Hanging"));
        assert!(!breakers.allow_request("Hanging"));
    }

    /// Validates the timer drives ticks and stop ends the loop.
    #[tokio::test(start_paused = true)]
    async fn test_timer_ticks_until_stopped() {
        let sink = Arc::new(FlakySink::new("Healthy", 0));
        let config = FlushSchedulerConfig {
            interval: Duration::from_secs(1),
            ..FlushSchedulerConfig::default()
        };
        let scheduler = MetricFlushScheduler::new(
            registry_with_points(),
            vec![sink.clone() as Arc<dyn MetricsSink>],
            Arc::new(SinkCircuitBreakerManager::disabled()),
            RetryPolicy::no_retry(),
            config,
        );

        scheduler.start().await.unwrap();
        assert!(scheduler.is_running());
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        scheduler.stop().await.unwrap();

        assert_eq!(sink.calls(), 3);
        assert!(!scheduler.is_running());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sink.calls(), 3);
    }
}
