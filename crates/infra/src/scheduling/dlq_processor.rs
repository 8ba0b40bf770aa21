//! Periodic replay of dead-lettered points.
//!
//! The reprocessor runs on its own interval, independent of the flush
//! scheduler. Each batch dequeues up to `batch_size` records and, for every
//! record:
//!
//! - drops it when it already reached `max_reprocess_attempts`,
//! - drops it when no enabled sink carries exactly its `sink_name`,
//! - otherwise re-exports the single point through the retry policy; on
//!   failure the record goes back to the queue with `retry_count + 1` and
//!   refreshed metadata.
//!
//! Records never block the flush path; the only terminal loss besides the
//! drops above is queue overflow.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use metricflow_common::resilience::RetryPolicy;
use metricflow_core::{DeadLetterQueue, FailedMetric, MetricsSink, RegistrySnapshot, SinkError};
use metricflow_domain::constants::{
    DLQ_ERROR_BACKOFF_MS, META_LAST_ERROR, META_LAST_REPROCESS_AT, META_REPROCESS_ATTEMPT,
};
use metricflow_domain::MetricsOptions;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::error::SchedulerResult;
use super::flush_scheduler::export_attempt;
use super::lifecycle::{panic_message, TaskSlot};

/// Configuration for the dead-letter reprocessor
#[derive(Debug, Clone)]
pub struct ReprocessorConfig {
    /// Time between batches
    pub interval: Duration,
    /// Most records taken per batch
    pub batch_size: usize,
    /// Records whose retry count reached this value are dropped
    pub max_reprocess_attempts: Option<u32>,
    /// Pause after a batch fails unexpectedly
    pub error_backoff: Duration,
    /// Limit for a single export attempt
    pub export_timeout: Duration,
    /// How long `stop` waits for an in-flight batch
    pub stop_timeout: Duration,
}

impl Default for ReprocessorConfig {
    fn default() -> Self {
        Self::from_options(&MetricsOptions::default())
    }
}

impl ReprocessorConfig {
    pub fn from_options(options: &MetricsOptions) -> Self {
        let dlq = &options.dead_letter_queue;
        Self {
            interval: dlq.processing_interval(),
            batch_size: dlq.batch_size,
            max_reprocess_attempts: dlq.max_reprocess_attempts,
            error_backoff: Duration::from_millis(DLQ_ERROR_BACKOFF_MS),
            export_timeout: options.export_timeout(),
            stop_timeout: options.export_timeout() + Duration::from_secs(5),
        }
    }
}

/// What one batch did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReprocessReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub requeued: usize,
    pub dropped_no_sink: usize,
    pub dropped_max_attempts: usize,
}

#[derive(Clone)]
struct ReprocessContext {
    queue: Arc<DeadLetterQueue>,
    sinks: Arc<[Arc<dyn MetricsSink>]>,
    retry: RetryPolicy,
    config: ReprocessorConfig,
    batch_lock: Arc<tokio::sync::Mutex<()>>,
}

/// Background task replaying the dead-letter queue.
pub struct DeadLetterReprocessor {
    context: ReprocessContext,
    export_cancel: parking_lot::Mutex<CancellationToken>,
    task: TaskSlot,
}

impl std::fmt::Debug for DeadLetterReprocessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadLetterReprocessor")
            .field("queued", &self.context.queue.len())
            .field("config", &self.context.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl DeadLetterReprocessor {
    pub fn new(
        queue: Arc<DeadLetterQueue>,
        sinks: Vec<Arc<dyn MetricsSink>>,
        retry: RetryPolicy,
        config: ReprocessorConfig,
    ) -> Self {
        Self {
            context: ReprocessContext {
                queue,
                sinks: sinks.into(),
                retry,
                config,
                batch_lock: Arc::new(tokio::sync::Mutex::new(())),
            },
            export_cancel: parking_lot::Mutex::new(CancellationToken::new()),
            task: TaskSlot::new("dlq_reprocessor"),
        }
    }

    pub fn queue(&self) -> &Arc<DeadLetterQueue> {
        &self.context.queue
    }

    pub fn config(&self) -> &ReprocessorConfig {
        &self.context.config
    }

    /// Start the reprocessor
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::AlreadyRunning` if it is already running.
    #[instrument(skip(self))]
    pub async fn start(&self) -> SchedulerResult<()> {
        let export_cancel = CancellationToken::new();
        let loop_export_cancel = export_cancel.clone();
        let context = self.context.clone();

        self.task
            .start(move |cancel| async move {
                Self::reprocess_loop(context, cancel, loop_export_cancel).await
            })
            .await?;
        *self.export_cancel.lock() = export_cancel;

        info!(
            interval_ms = self.context.config.interval.as_millis() as u64,
            batch_size = self.context.config.batch_size,
            "Dead-letter reprocessor started"
        );
        Ok(())
    }

    /// Stop the reprocessor, letting an in-flight batch finish.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::NotRunning` if it is not running and
    /// `SchedulerError::Timeout` if the batch had to be aborted.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> SchedulerResult<()> {
        let export_cancel = self.export_cancel.lock().clone();
        self.task.stop(self.context.config.stop_timeout, move || export_cancel.cancel()).await?;
        info!("Dead-letter reprocessor stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    /// Processes one batch now, independent of the timer.
    pub async fn process_batch(&self) -> ReprocessReport {
        let cancel = self.export_cancel.lock().clone();
        self.context.process_batch(&cancel).await
    }

    async fn reprocess_loop(
        context: ReprocessContext,
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
                    debug!("Reprocess loop cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    let batch = AssertUnwindSafe(context.process_batch(&export_cancel))
                        .catch_unwind()
                        .await;
                    if let Err(panic) = batch {
                        error!(
                            error = %panic_message(panic.as_ref()),
                            backoff_ms = context.config.error_backoff.as_millis() as u64,
                            "Dead-letter batch failed"
                        );
                        tokio::select! {
                            () = cancel.cancelled() => break,
                            () = tokio::time::sleep(context.config.error_backoff) => {}
                        }
                    }
                }
            }
        }
    }
}

impl ReprocessContext {
    async fn process_batch(&self, cancel: &CancellationToken) -> ReprocessReport {
        let _guard = self.batch_lock.lock().await;
        let mut report = ReprocessReport::default();

        let batch = self.queue.dequeue_batch(self.config.batch_size);
        if batch.is_empty() {
            debug!("Dead-letter queue empty");
            return report;
        }

        let mut records = batch.into_iter();
        while let Some(record) = records.next() {
            if cancel.is_cancelled() {
                // Put the untouched remainder back as-is.
                let mut remaining = 1;
                self.queue.enqueue(record);
                for rest in records.by_ref() {
                    self.queue.enqueue(rest);
                    remaining += 1;
                }
                debug!(remaining, "Reprocessing cancelled, records returned to queue");
                break;
            }
            report.attempted += 1;

            if let Some(max) = self.config.max_reprocess_attempts {
                if record.retry_count >= max {
                    warn!(
                        sink = %record.sink_name,
                        metric = %record.point.name,
                        retry_count = record.retry_count,
                        "Dropping dead-lettered record after max reprocess attempts"
                    );
                    report.dropped_max_attempts += 1;
                    continue;
                }
            }

            let Some(sink) = self.resolve_sink(&record.sink_name) else {
                warn!(
                    sink = %record.sink_name,
                    metric = %record.point.name,
                    "No enabled sink with this name, dropping dead-lettered record"
                );
                report.dropped_no_sink += 1;
                continue;
            };

            match self.replay(sink.as_ref(), &record, cancel).await {
                Ok(()) => {
                    debug!(
                        sink = %record.sink_name,
                        metric = %record.point.name,
                        "Replayed dead-lettered record"
                    );
                    report.succeeded += 1;
                }
                Err(err) => {
                    self.queue.enqueue(requeued(record, &err));
                    report.requeued += 1;
                }
            }
        }

        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            requeued = report.requeued,
            dropped_no_sink = report.dropped_no_sink,
            dropped_max_attempts = report.dropped_max_attempts,
            "Dead-letter batch processed"
        );
        report
    }

    fn resolve_sink(&self, name: &str) -> Option<Arc<dyn MetricsSink>> {
        self.sinks.iter().find(|sink| sink.name() == name && sink.is_enabled()).cloned()
    }

    async fn replay(
        &self,
        sink: &dyn MetricsSink,
        record: &FailedMetric,
        cancel: &CancellationToken,
    ) -> Result<(), SinkError> {
        let snapshot = RegistrySnapshot::replay(vec![record.point.clone()]);
        let snapshot = &snapshot;
        let timeout = self.config.export_timeout;
        let outcome = self
            .retry
            .execute_if(
                move || export_attempt(sink, snapshot, cancel, timeout),
                SinkError::is_retryable,
                cancel,
            )
            .await;
        if outcome.success {
            Ok(())
        } else {
            Err(outcome.last_error.unwrap_or(SinkError::Cancelled))
        }
    }
}

/// The record as it goes back to the queue after a failed replay.
fn requeued(mut record: FailedMetric, error: &SinkError) -> FailedMetric {
    record.retry_count += 1;
    record.last_error = error.to_string();
    record.metadata.insert(META_REPROCESS_ATTEMPT.to_string(), record.retry_count.to_string());
    record.metadata.insert(META_LAST_REPROCESS_AT.to_string(), Utc::now().to_rfc3339());
    record.metadata.insert(META_LAST_ERROR.to_string(), record.last_error.clone());
    record
}
