//! Start/stop bookkeeping shared by the background schedulers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::{SchedulerError, SchedulerResult};

/// Type alias for task handle to avoid complexity warnings
type TaskHandle = Arc<Mutex<Option<JoinHandle<()>>>>;

/// One restartable background task and its cancellation token.
pub(crate) struct TaskSlot {
    name: &'static str,
    cancellation_token: parking_lot::Mutex<CancellationToken>,
    task_handle: TaskHandle,
}

impl TaskSlot {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            cancellation_token: parking_lot::Mutex::new(CancellationToken::new()),
            task_handle: Arc::new(Mutex::new(None)),
        }
    }

    /// Spawns the task built by `task`, handing it a fresh cancellation
    /// token (supports restart after stop).
    pub(crate) async fn start<F, Fut>(&self, task: F) -> SchedulerResult<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.task_handle.lock().await;
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Err(SchedulerError::AlreadyRunning);
        }

        let cancel = CancellationToken::new();
        *self.cancellation_token.lock() = cancel.clone();
        *slot = Some(tokio::spawn(task(cancel)));
        debug!(task = self.name, "background task spawned");
        Ok(())
    }

    /// Cancels the task and waits for it to finish.
    ///
    /// If the task is still busy after `timeout`, `on_timeout` runs (to
    /// cancel in-flight work) and the task gets one more `timeout` before it
    /// is aborted.
    pub(crate) async fn stop(
        &self,
        timeout: Duration,
        on_timeout: impl FnOnce(),
    ) -> SchedulerResult<()> {
        let Some(mut handle) = self.task_handle.lock().await.take() else {
            return Err(SchedulerError::NotRunning);
        };
        if handle.is_finished() {
            return Err(SchedulerError::NotRunning);
        }

        self.cancellation_token.lock().cancel();

        if let Ok(joined) = tokio::time::timeout(timeout, &mut handle).await {
            return joined.map_err(SchedulerError::from);
        }

        warn!(task = self.name, ?timeout, "background task still busy, cancelling in-flight work");
        on_timeout();
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(joined) => joined.map_err(SchedulerError::from),
            Err(_) => {
                handle.abort();
                Err(SchedulerError::Timeout { duration: timeout })
            }
        }
    }

    /// A task is running if it has a handle that hasn't finished.
    pub(crate) fn is_running(&self) -> bool {
        self.task_handle
            .try_lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|h| !h.is_finished()))
            .unwrap_or(false)
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.cancellation_token.lock().cancel();
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
