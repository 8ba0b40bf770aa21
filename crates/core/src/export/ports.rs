//! Port interface implemented by every sink adapter

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::registry::RegistrySnapshot;

/// Failure of one export attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// Network or I/O failure talking to the backend.
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend answered with a non-success status.
    #[error("rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The snapshot could not be encoded for this backend.
    #[error("encoding failed: {0}")]
    Encode(String),

    /// The export did not finish in time.
    #[error("export timed out after {0:?}")]
    Timeout(Duration),

    /// The export was cancelled.
    #[error("export cancelled")]
    Cancelled,

    /// The sink is disabled or misconfigured and will not accept data.
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

impl SinkError {
    /// Whether retrying the same export can succeed.
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Encode(_) | Self::Cancelled | Self::Unavailable(_))
    }
}

/// An external system that consumes registry snapshots.
///
/// Implementations report ordinary failures through `Err`; the scheduler
/// treats every error as a failed attempt and routes it through retry,
/// circuit breaking and the dead-letter queue.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Stable name used for breaker configuration and dead-letter routing.
    fn name(&self) -> &str;

    /// Whether the scheduler should export to this sink.
    fn is_enabled(&self) -> bool;

    /// Exports every point of `snapshot`.
    async fn export(
        &self,
        snapshot: &RegistrySnapshot,
        cancel: &CancellationToken,
    ) -> Result<(), SinkError>;
}
