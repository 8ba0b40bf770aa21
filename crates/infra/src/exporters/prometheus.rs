//! Prometheus text exposition (format 0.0.4).
//!
//! Prometheus pulls, so [`PrometheusSink::export`] only renders the snapshot
//! and caches the text. Replayed snapshots are accepted without touching the
//! cache. [`PrometheusSink::router`] serves the cached text at
//! the configured path.
//!
//! ```text
//! # HELP http_request_seconds Request latency
//! # TYPE http_request_seconds histogram
//! http_request_seconds_bucket{route="/a",le="0.1"} 3
//! http_request_seconds_bucket{route="/a",le="+Inf"} 4
//! http_request_seconds_sum{route="/a"} 0.42
//! http_request_seconds_count{route="/a"} 4
//! ```

use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use metricflow_core::{MetricPoint, MetricsSink, PointValue, RegistrySnapshot, SinkError, TagSet};
use metricflow_domain::constants::SINK_PROMETHEUS;
use metricflow_domain::{MetricKind, PrometheusOptions};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::format_value;

/// Content type of the text exposition format.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Pull-based sink that keeps the latest rendering for scraping.
#[derive(Debug)]
pub struct PrometheusSink {
    options: PrometheusOptions,
    latest: RwLock<Arc<str>>,
}

impl PrometheusSink {
    pub fn new(options: PrometheusOptions) -> Self {
        Self { options, latest: RwLock::new(Arc::from("")) }
    }

    /// Text produced by the most recent export.
    pub fn latest(&self) -> Arc<str> {
        self.latest.read().clone()
    }

    /// Router serving the latest rendering at the configured path.
    pub fn router(self: &Arc<Self>) -> Router {
        let sink = Arc::clone(self);
        Router::new().route(
            &self.options.path,
            get(move || {
                let body = sink.latest();
                async move {
                    ([(header::CONTENT_TYPE, CONTENT_TYPE)], body.to_string()).into_response()
                }
            }),
        )
    }

    /// Serves [`router`](Self::router) on `addr` until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the address cannot be bound or the server
    /// fails.
    pub async fn serve(
        self: Arc<Self>,
        addr: SocketAddr,
        cancel: CancellationToken,
    ) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        info!(addr = %local, path = %self.options.path, "serving Prometheus metrics");
        let app = self.router();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .inspect_err(|err| error!(error = %err, "Prometheus scrape server failed"))
    }
}

#[async_trait]
impl MetricsSink for PrometheusSink {
    fn name(&self) -> &str {
        SINK_PROMETHEUS
    }

    fn is_enabled(&self) -> bool {
        self.options.enabled
    }

    async fn export(
        &self,
        snapshot: &RegistrySnapshot,
        cancel: &CancellationToken,
    ) -> Result<(), SinkError> {
        if cancel.is_cancelled() {
            return Err(SinkError::Cancelled);
        }
        if snapshot.replay {
            // The next flush re-renders every series; a stale subset would
            // only shrink the scrape output.
            debug!(points = snapshot.len(), "ignoring replayed points for pull exporter");
            return Ok(());
        }
        let text = render(snapshot);
        debug!(points = snapshot.len(), bytes = text.len(), "rendered Prometheus exposition");
        *self.latest.write() = Arc::from(text);
        Ok(())
    }
}

/// Renders `snapshot` in the text exposition format.
///
/// Points of the same kind and name must be adjacent, which registry
/// snapshots guarantee.
pub fn render(snapshot: &RegistrySnapshot) -> String {
    let mut out = String::new();
    let mut current: Option<(MetricKind, &str)> = None;

    for point in &snapshot.points {
        let key = (point.kind(), point.name.as_str());
        let name = sanitize_name(&point.name);
        if current != Some(key) {
            current = Some(key);
            if !point.description.is_empty() {
                let _ = writeln!(out, "# HELP {name} {}", escape_help(&point.description));
            }
            let _ = writeln!(out, "# TYPE {name} {}", point.kind());
        }
        write_point(&mut out, &name, point);
    }
    out
}

fn write_point(out: &mut String, name: &str, point: &MetricPoint) {
    let tags = &point.tags;
    match &point.value {
        PointValue::Counter { value } | PointValue::Gauge { value } => {
            let _ = writeln!(out, "{name}{} {}", labels(tags, None), format_value(*value));
        }
        PointValue::Histogram { buckets, count, sum } => {
            for bucket in buckets {
                let le = format_value(bucket.upper_bound);
                let bucket_labels = labels(tags, Some(("le", &le)));
                let _ = writeln!(out, "{name}_bucket{bucket_labels} {}", bucket.count);
            }
            let _ = writeln!(out, "{name}_bucket{} {count}", labels(tags, Some(("le", "+Inf"))));
            let _ = writeln!(out, "{name}_sum{} {}", labels(tags, None), format_value(*sum));
            let _ = writeln!(out, "{name}_count{} {count}", labels(tags, None));
        }
        PointValue::Summary { quantiles, count, sum } => {
            for q in quantiles {
                let quantile = format_value(q.quantile);
                let _ = writeln!(
                    out,
                    "{name}{} {}",
                    labels(tags, Some(("quantile", &quantile))),
                    format_value(q.value)
                );
            }
            let _ = writeln!(out, "{name}_sum{} {}", labels(tags, None), format_value(*sum));
            let _ = writeln!(out, "{name}_count{} {count}", labels(tags, None));
        }
    }
}

fn labels(tags: &TagSet, extra: Option<(&str, &str)>) -> String {
    if tags.is_empty() && extra.is_none() {
        return String::new();
    }
    let pairs = tags
        .iter()
        .chain(extra)
        .map(|(k, v)| format!("{}=\"{}\"", sanitize_label(k), escape_label_value(v)))
        .collect::<Vec<_>>();
    format!("{{{}}}", pairs.join(","))
}

/// Metric names match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
fn sanitize_name(raw: &str) -> String {
    sanitize(raw, true)
}

/// Label names match `[a-zA-Z_][a-zA-Z0-9_]*`.
fn sanitize_label(raw: &str) -> String {
    sanitize(raw, false)
}

fn sanitize(raw: &str, allow_colon: bool) -> String {
    let mut out: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || (allow_colon && c == ':') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

fn escape_help(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('\n', "\\n")
}

fn escape_label_value(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use metricflow_core::{tags, MetricRegistry};
    use tower::ServiceExt;

    use super::*;

    fn sample_registry() -> MetricRegistry {
        let registry = MetricRegistry::new();
        registry
            .get_or_create_counter("requests_total", "Requests served")
            .inc(&tags! { "env" => "prod" }, 7.0);
        registry.get_or_create_gauge("queue depth", "").set(&tags! {}, 3.5);
        let histogram =
            registry.get_or_create_histogram("latency_seconds", "Latency", Some(&[0.1, 1.0]));
        histogram.observe(&tags! { "route" => "/a" }, 0.0625);
        histogram.observe(&tags! { "route" => "/a" }, 0.5);
        histogram.observe(&tags! { "route" => "/a" }, 4.0);
        registry
    }

    #[test]
    fn test_render_counter_and_gauge() {
        let text = render(&sample_registry().snapshot());

        assert!(text
            .contains("# HELP requests_total Requests served\n# TYPE requests_total counter\n"));
        assert!(text.contains("requests_total{env=\"prod\"} 7\n"));
        assert!(text.contains("# TYPE queue_depth gauge\nqueue_depth 3.5\n"));
    }

    #[test]
    fn test_render_histogram_buckets_are_cumulative() {
        let text = render(&sample_registry().snapshot());

        assert!(text.contains("latency_seconds_bucket{route=\"/a\",le=\"0.1\"} 1\n"));
        assert!(text.contains("latency_seconds_bucket{route=\"/a\",le=\"1\"} 2\n"));
        assert!(text.contains("latency_seconds_bucket{route=\"/a\",le=\"+Inf\"} 3\n"));
        assert!(text.contains("latency_seconds_sum{route=\"/a\"} 4.5625\n"));
        assert!(text.contains("latency_seconds_count{route=\"/a\"} 3\n"));
    }

    #[test]
    fn test_render_summary_quantiles() {
        let registry = MetricRegistry::new();
        let summary = registry.get_or_create_summary("payload_bytes", "", Some(&[0.5]), None);
        for v in [1.0, 2.0, 3.0] {
            summary.observe(&tags! {}, v);
        }
        let text = render(&registry.snapshot());

        assert!(text.contains("# TYPE payload_bytes summary\n"));
        assert!(text.contains("payload_bytes{quantile=\"0.5\"} 2\n"));
        assert!(text.contains("payload_bytes_sum 6\n"));
        assert!(text.contains("payload_bytes_count 3\n"));
    }

    #[test]
    fn test_label_values_are_escaped() {
        let registry = MetricRegistry::new();
        registry
            .get_or_create_counter("errors_total", "")
            .inc(&tags! { "message" => "say \"hi\"\n" }, 1.0);
        let text = render(&registry.snapshot());

        assert!(text.contains(r#"errors_total{message="say \"hi\"\n"} 1"#));
    }

    #[test]
    fn test_help_emitted_once_per_metric() {
        let registry = MetricRegistry::new();
        let counter = registry.get_or_create_counter("hits_total", "Hits");
        counter.inc(&tags! { "route" => "/a" }, 1.0);
        counter.inc(&tags! { "route" => "/b" }, 1.0);
        let text = render(&registry.snapshot());

        assert_eq!(text.matches("# HELP hits_total").count(), 1);
        assert_eq!(text.matches("# TYPE hits_total").count(), 1);
    }

    /// Validates a replayed subset leaves the scrape output untouched.
    #[tokio::test]
    async fn test_replay_keeps_cached_exposition() {
        let sink = PrometheusSink::new(PrometheusOptions::default());
        let snapshot = sample_registry().snapshot();
        let cancel = CancellationToken::new();
        sink.export(&snapshot, &cancel).await.unwrap();
        let before = sink.latest();

        let stale = RegistrySnapshot::replay(vec![snapshot.points[0].clone()]);
        sink.export(&stale, &cancel).await.unwrap();

        assert_eq!(sink.latest(), before);
        assert!(sink.latest().contains("latency_seconds_count{route=\"/a\"} 3"));
    }

    #[tokio::test]
    async fn test_router_serves_latest_export() {
        let sink = Arc::new(PrometheusSink::new(PrometheusOptions::default()));
        sink.export(&sample_registry().snapshot(), &CancellationToken::new()).await.unwrap();

        let response = sink
            .router()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], CONTENT_TYPE);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("requests_total{env=\"prod\"} 7"));
    }
}
