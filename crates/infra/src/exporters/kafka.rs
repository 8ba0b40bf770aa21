//! Kafka exporter.
//!
//! Each point becomes one JSON message keyed by `<name>|<fingerprint>` so a
//! series always lands on the same partition. Messages are handed to a
//! [`MessageProducer`] in chunks of `batch_size`.
//!
//! No broker client is linked in; [`LoggingProducer`] logs batches instead of
//! publishing them, and deployments plug a real producer in through
//! [`KafkaSink::new`].

use std::sync::Arc;

use async_trait::async_trait;
use metricflow_core::{MetricPoint, MetricsSink, RegistrySnapshot, SinkError};
use metricflow_domain::constants::SINK_KAFKA;
use metricflow_domain::KafkaOptions;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// One record ready for publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaMessage {
    pub key: String,
    pub payload: String,
}

/// Publishes message batches to a topic.
#[async_trait]
pub trait MessageProducer: Send + Sync {
    async fn send_batch(&self, topic: &str, messages: &[KafkaMessage]) -> Result<(), SinkError>;
}

/// Producer that logs every batch at `info` and never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingProducer;

#[async_trait]
impl MessageProducer for LoggingProducer {
    async fn send_batch(&self, topic: &str, messages: &[KafkaMessage]) -> Result<(), SinkError> {
        info!(topic, messages = messages.len(), "Kafka batch (logging producer)");
        for message in messages {
            debug!(topic, key = %message.key, payload = %message.payload, "Kafka message");
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct Payload<'a> {
    service: &'a str,
    #[serde(flatten)]
    point: &'a MetricPoint,
    timestamp: String,
}

/// Publishes every point as a JSON message.
pub struct KafkaSink {
    options: KafkaOptions,
    service_name: String,
    producer: Arc<dyn MessageProducer>,
}

impl std::fmt::Debug for KafkaSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaSink")
            .field("options", &self.options)
            .field("service_name", &self.service_name)
            .finish_non_exhaustive()
    }
}

impl KafkaSink {
    pub fn new(
        options: KafkaOptions,
        service_name: &str,
        producer: Arc<dyn MessageProducer>,
    ) -> Self {
        Self { options, service_name: service_name.to_string(), producer }
    }

    /// Encodes every point of `snapshot` as a message.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::Encode` if a point cannot be serialized.
    pub fn encode(&self, snapshot: &RegistrySnapshot) -> Result<Vec<KafkaMessage>, SinkError> {
        let timestamp = snapshot.timestamp.to_rfc3339();
        snapshot
            .points
            .iter()
            .map(|point| {
                let payload = Payload {
                    service: &self.service_name,
                    point,
                    timestamp: timestamp.clone(),
                };
                let payload =
                    serde_json::to_string(&payload).map_err(|e| SinkError::Encode(e.to_string()))?;
                Ok(KafkaMessage { key: format!("{}|{}", point.name, point.fingerprint()), payload })
            })
            .collect()
    }
}

#[async_trait]
impl MetricsSink for KafkaSink {
    fn name(&self) -> &str {
        SINK_KAFKA
    }

    fn is_enabled(&self) -> bool {
        self.options.enabled
    }

    async fn export(
        &self,
        snapshot: &RegistrySnapshot,
        cancel: &CancellationToken,
    ) -> Result<(), SinkError> {
        let messages = self.encode(snapshot)?;
        for chunk in messages.chunks(self.options.batch_size.max(1)) {
            if cancel.is_cancelled() {
                return Err(SinkError::Cancelled);
            }
            self.producer.send_batch(&self.options.topic, chunk).await?;
        }
        debug!(topic = %self.options.topic, messages = messages.len(), "exported Kafka messages");
        Ok(())
    }
}
