//! InfluxDB v2 line protocol exporter.
//!
//! ```text
//! requests_total,env=prod value=7 1700000000000000000
//! latency_seconds,route=/a count=3i,sum=4.5625,le_0.1=1i,le_1=2i 1700000000000000000
//! payload_bytes p50=2,p99=3,sum=6,count=3i 1700000000000000000
//! ```
//!
//! Non-finite values have no line protocol representation and are skipped.

use std::fmt::Write as _;
use std::time::Duration;

use async_trait::async_trait;
use metricflow_core::{MetricPoint, MetricsSink, PointValue, RegistrySnapshot, SinkError};
use metricflow_domain::constants::SINK_INFLUXDB;
use metricflow_domain::{InfluxOptions, MetricsError, Result};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use super::format_value;
use crate::http::HttpClient;

/// Writes snapshots to an InfluxDB v2 bucket.
#[derive(Debug)]
pub struct InfluxSink {
    options: InfluxOptions,
    write_url: Url,
    client: HttpClient,
}

impl InfluxSink {
    /// # Errors
    ///
    /// Returns `MetricsError::Config` if the URL is invalid or the HTTP
    /// client cannot be built.
    pub fn new(options: InfluxOptions) -> Result<Self> {
        let base = options.url.trim_end_matches('/');
        let mut write_url = Url::parse(&format!("{base}/api/v2/write")).map_err(|e| {
            MetricsError::Config(format!("Invalid InfluxDB url '{}': {e}", options.url))
        })?;
        write_url
            .query_pairs_mut()
            .append_pair("org", &options.org)
            .append_pair("bucket", &options.bucket)
            .append_pair("precision", "ns");

        let client = HttpClient::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()?;

        Ok(Self { options, write_url, client })
    }

    pub const fn write_url(&self) -> &Url {
        &self.write_url
    }
}

#[async_trait]
impl MetricsSink for InfluxSink {
    fn name(&self) -> &str {
        SINK_INFLUXDB
    }

    fn is_enabled(&self) -> bool {
        self.options.enabled
    }

    async fn export(
        &self,
        snapshot: &RegistrySnapshot,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), SinkError> {
        let body = encode(snapshot);
        if body.is_empty() {
            return Ok(());
        }

        let mut request = self
            .client
            .request(Method::POST, self.write_url.clone())
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body);
        if let Some(token) = &self.options.token {
            request = request.header(AUTHORIZATION, format!("Token {token}"));
        }

        debug!(points = snapshot.len(), bucket = %self.options.bucket, "writing InfluxDB points");
        self.client.send(request, cancel).await
    }
}

/// Encodes `snapshot` as newline-separated line protocol.
pub fn encode(snapshot: &RegistrySnapshot) -> String {
    let timestamp = snapshot.timestamp_nanos();
    let mut out = String::new();
    for point in &snapshot.points {
        let fields = fields(point);
        if fields.is_empty() {
            continue;
        }
        out.push_str(&escape(&point.name, &[',', ' ']));
        for (key, value) in point.tags.iter() {
            let (key, value) = (escape(key, &[',', '=', ' ']), escape(value, &[',', '=', ' ']));
            let _ = write!(out, ",{key}={value}");
        }
        let _ = writeln!(out, " {} {timestamp}", fields.join(","));
    }
    out
}

fn fields(point: &MetricPoint) -> Vec<String> {
    let mut fields = Vec::new();
    match &point.value {
        PointValue::Counter { value } | PointValue::Gauge { value } => {
            push_float(&mut fields, "value", *value);
        }
        PointValue::Histogram { buckets, count, sum } => {
            fields.push(format!("count={count}i"));
            push_float(&mut fields, "sum", *sum);
            for bucket in buckets {
                if bucket.upper_bound.is_finite() {
                    let bound = format_value(bucket.upper_bound);
                    fields.push(format!("le_{bound}={}i", bucket.count));
                }
            }
        }
        PointValue::Summary { quantiles, count, sum } => {
            for q in quantiles {
                push_float(&mut fields, &format!("p{}", format_value(q.quantile * 100.0)), q.value);
            }
            push_float(&mut fields, "sum", *sum);
            fields.push(format!("count={count}i"));
        }
    }
    fields
}

fn push_float(fields: &mut Vec<String>, key: &str, value: f64) {
    if value.is_finite() {
        fields.push(format!("{}={}", escape(key, &[',', '=', ' ']), format_value(value)));
    }
}

fn escape(raw: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
