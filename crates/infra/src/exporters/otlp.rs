//! OTLP/HTTP JSON exporter.
//!
//! Each export POSTs one `ExportMetricsServiceRequest` to
//! `{endpoint}/v1/metrics`. Counters become monotonic cumulative sums,
//! histograms carry per-bucket (not cumulative) counts with an extra
//! overflow bucket, and 64-bit integers are encoded as strings per the
//! protobuf JSON mapping.
//!
//! Bodies above [`COMPRESSION_THRESHOLD`] bytes are gzip-compressed when
//! `otlp.compression` is set.

use std::io::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use metricflow_core::{MetricPoint, MetricsSink, PointValue, RegistrySnapshot, SinkError};
use metricflow_domain::constants::SINK_OTLP;
use metricflow_domain::{MetricKind, MetricsError, OtlpOptions, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::Method;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::http::HttpClient;

/// Bodies larger than this are compressed.
pub const COMPRESSION_THRESHOLD: usize = 1024;

/// `AGGREGATION_TEMPORALITY_CUMULATIVE`
const CUMULATIVE: u8 = 2;

/// Pushes snapshots to an OpenTelemetry collector.
#[derive(Debug)]
pub struct OtlpSink {
    options: OtlpOptions,
    url: Url,
    client: HttpClient,
    resource: Value,
}

impl OtlpSink {
    /// # Errors
    ///
    /// Returns `MetricsError::Config` if the endpoint is not a valid URL, a
    /// configured header is malformed, or the HTTP client cannot be built.
    pub fn new(options: OtlpOptions, service_name: &str, environment: &str) -> Result<Self> {
        let base = options.endpoint.trim_end_matches('/');
        let url = Url::parse(&format!("{base}/v1/metrics")).map_err(|e| {
            MetricsError::Config(format!("Invalid OTLP endpoint '{}': {e}", options.endpoint))
        })?;

        let mut headers = HeaderMap::new();
        for (key, value) in &options.headers {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                MetricsError::Config(format!("Invalid OTLP header name '{key}': {e}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                MetricsError::Config(format!("Invalid OTLP header value for '{key}': {e}"))
            })?;
            headers.insert(name, value);
        }

        let client = HttpClient::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .default_headers(headers)
            .build()?;

        let resource = json!({
            "attributes": [
                string_attribute("service.name", service_name),
                string_attribute("deployment.environment", environment),
            ]
        });

        Ok(Self { options, url, client, resource })
    }

    /// Full URL exports are posted to.
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// Builds the JSON request body for `snapshot`.
    pub fn encode(&self, snapshot: &RegistrySnapshot) -> Value {
        let time = snapshot.timestamp_nanos().to_string();
        let mut metrics: Vec<Value> = Vec::new();
        let mut current: Option<(MetricKind, &str)> = None;
        let mut points: Vec<Value> = Vec::new();
        let mut head: Option<&MetricPoint> = None;

        for point in &snapshot.points {
            let key = (point.kind(), point.name.as_str());
            if current != Some(key) {
                if let Some(first) = head {
                    metrics.push(metric(first, std::mem::take(&mut points)));
                }
                current = Some(key);
                head = Some(point);
            }
            points.push(data_point(point, &time));
        }
        if let Some(first) = head {
            metrics.push(metric(first, points));
        }

        json!({
            "resourceMetrics": [{
                "resource": self.resource,
                "scopeMetrics": [{
                    "scope": { "name": "metricflow", "version": env!("CARGO_PKG_VERSION") },
                    "metrics": metrics,
                }],
            }],
        })
    }
}

#[async_trait]
impl MetricsSink for OtlpSink {
    fn name(&self) -> &str {
        SINK_OTLP
    }

    fn is_enabled(&self) -> bool {
        self.options.enabled
    }

    async fn export(
        &self,
        snapshot: &RegistrySnapshot,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), SinkError> {
        if snapshot.is_empty() {
            return Ok(());
        }
        let body = serde_json::to_vec(&self.encode(snapshot))
            .map_err(|e| SinkError::Encode(e.to_string()))?;

        let mut request = self
            .client
            .request(Method::POST, self.url.clone())
            .header(CONTENT_TYPE, "application/json");
        let raw_len = body.len();
        if self.options.compression && raw_len > COMPRESSION_THRESHOLD {
            request = request.header(CONTENT_ENCODING, "gzip").body(gzip(&body)?);
        } else {
            request = request.body(body);
        }

        debug!(points = snapshot.len(), bytes = raw_len, url = %self.url, "exporting OTLP metrics");
        self.client.send(request, cancel).await
    }
}

fn gzip(body: &[u8]) -> std::result::Result<Vec<u8>, SinkError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 4), Compression::default());
    encoder.write_all(body).map_err(|e| SinkError::Encode(format!("gzip: {e}")))?;
    encoder.finish().map_err(|e| SinkError::Encode(format!("gzip: {e}")))
}

fn string_attribute(key: &str, value: &str) -> Value {
    json!({ "key": key, "value": { "stringValue": value } })
}

fn metric(first: &MetricPoint, data_points: Vec<Value>) -> Value {
    let data = match first.kind() {
        MetricKind::Counter => json!({
            "sum": {
                "dataPoints": data_points,
                "aggregationTemporality": CUMULATIVE,
                "isMonotonic": true,
            }
        }),
        MetricKind::Gauge => json!({ "gauge": { "dataPoints": data_points } }),
        MetricKind::Histogram => json!({
            "histogram": { "dataPoints": data_points, "aggregationTemporality": CUMULATIVE }
        }),
        MetricKind::Summary => json!({ "summary": { "dataPoints": data_points } }),
    };
    let mut metric = json!({ "name": first.name, "description": first.description });
    if let (Some(target), Some(fields)) = (metric.as_object_mut(), data.as_object()) {
        target.extend(fields.clone());
    }
    metric
}

fn data_point(point: &MetricPoint, time: &str) -> Value {
    let attributes: Vec<Value> = point.tags.iter().map(|(k, v)| string_attribute(k, v)).collect();
    match &point.value {
        PointValue::Counter { value } | PointValue::Gauge { value } => json!({
            "attributes": attributes,
            "timeUnixNano": time,
            "asDouble": value,
        }),
        PointValue::Histogram { buckets, count, sum } => {
            let mut previous = 0u64;
            let mut bucket_counts: Vec<String> = buckets
                .iter()
                .map(|b| {
                    let delta = b.count.saturating_sub(previous);
                    previous = b.count;
                    delta.to_string()
                })
                .collect();
            bucket_counts.push(count.saturating_sub(previous).to_string());
            let bounds: Vec<f64> = buckets.iter().map(|b| b.upper_bound).collect();
            json!({
                "attributes": attributes,
                "timeUnixNano": time,
                "count": count.to_string(),
                "sum": sum,
                "bucketCounts": bucket_counts,
                "explicitBounds": bounds,
            })
        }
        PointValue::Summary { quantiles, count, sum } => {
            let quantile_values: Vec<Value> = quantiles
                .iter()
                .map(|q| json!({ "quantile": q.quantile, "value": q.value }))
                .collect();
            json!({
                "attributes": attributes,
                "timeUnixNano": time,
                "count": count.to_string(),
                "sum": sum,
                "quantileValues": quantile_values,
            })
        }
    }
}
