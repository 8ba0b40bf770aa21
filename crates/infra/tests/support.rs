#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metricflow_common::resilience::RetryPolicy;
use metricflow_core::{MetricsSink, RegistrySnapshot, SinkError};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Sink whose failure mode can be flipped while a test runs.
pub struct ScriptedSink {
    name: &'static str,
    failing: AtomicBool,
    calls: AtomicU32,
    exported: Mutex<Vec<String>>,
}

impl ScriptedSink {
    pub fn healthy(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            failing: AtomicBool::new(false),
            calls: AtomicU32::new(0),
            exported: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(name: &'static str) -> Arc<Self> {
        let sink = Self::healthy(name);
        sink.set_failing(true);
        sink
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Names of every point delivered successfully, in delivery order.
    pub fn exported(&self) -> Vec<String> {
        self.exported.lock().clone()
    }
}

#[async_trait]
impl MetricsSink for ScriptedSink {
    fn name(&self) -> &str {
        self.name
    }

    fn is_enabled(&self) -> bool {
        true
    }

    async fn export(
        &self,
        snapshot: &RegistrySnapshot,
        _cancel: &CancellationToken,
    ) -> Result<(), SinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Transport("connection refused".to_string()));
        }
        self.exported.lock().extend(snapshot.points.iter().map(|p| p.name.clone()));
        Ok(())
    }
}

pub fn as_sinks(sinks: &[&Arc<ScriptedSink>]) -> Vec<Arc<dyn MetricsSink>> {
    sinks.iter().map(|sink| Arc::clone(sink) as Arc<dyn MetricsSink>).collect()
}

/// Retry policy with millisecond delays and no jitter.
pub fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(max_retries)
        .initial_delay(Duration::from_millis(1))
        .jitter_percent(0.0)
        .build()
        .expect("valid retry policy")
}
