//! Health report for the export pipeline
//!
//! Diagnostic only: nothing here raises errors. The report is serializable so
//! a host application can expose it on a health endpoint.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metricflow_common::resilience::CircuitState;
use metricflow_core::{BusStatus, DeadLetterStats};
use serde::Serialize;

use crate::scheduling::{DeadLetterReprocessor, MetricFlushScheduler};

/// Health of a single sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SinkHealth {
    pub name: String,
    pub enabled: bool,
    pub breaker_state: CircuitState,
    pub consecutive_failures: u32,
}

/// Point-in-time view of the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub scheduler_running: bool,
    /// `None` when no reprocessor is attached.
    pub reprocessor_running: Option<bool>,
    /// Empty stats when the scheduler has no dead-letter queue.
    pub dlq: DeadLetterStats,
    pub bus: Option<BusStatus>,
    pub sinks: Vec<SinkHealth>,
    /// The scheduler is running and no sink breaker is open.
    pub healthy: bool,
    pub timestamp: DateTime<Utc>,
}

/// Builds [`HealthReport`]s from live pipeline components.
#[derive(Debug, Clone)]
pub struct HealthReporter {
    scheduler: Arc<MetricFlushScheduler>,
    reprocessor: Option<Arc<DeadLetterReprocessor>>,
}

impl HealthReporter {
    pub fn new(scheduler: Arc<MetricFlushScheduler>) -> Self {
        Self { scheduler, reprocessor: None }
    }

    #[must_use]
    pub fn with_reprocessor(mut self, reprocessor: Arc<DeadLetterReprocessor>) -> Self {
        self.reprocessor = Some(reprocessor);
        self
    }

    pub fn report(&self) -> HealthReport {
        let scheduler = &self.scheduler;
        let breakers = scheduler.breakers();

        let sinks: Vec<SinkHealth> = scheduler
            .sinks()
            .iter()
            .map(|sink| SinkHealth {
                name: sink.name().to_string(),
                enabled: sink.is_enabled(),
                breaker_state: breakers.state(sink.name()),
                consecutive_failures: breakers.consecutive_failures(sink.name()),
            })
            .collect();

        let scheduler_running = scheduler.is_running();
        let any_open = sinks.iter().any(|sink| sink.breaker_state == CircuitState::Open);

        HealthReport {
            scheduler_running,
            reprocessor_running: self.reprocessor.as_ref().map(|r| r.is_running()),
            dlq: scheduler.dead_letter_queue().map(|queue| queue.stats()).unwrap_or_default(),
            bus: scheduler.bus().map(|bus| bus.status()),
            sinks,
            healthy: scheduler_running && !any_open,
            timestamp: Utc::now(),
        }
    }
}
