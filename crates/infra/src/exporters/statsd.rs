//! DogStatsD exporter over UDP.
//!
//! Lines follow the DogStatsD protocol:
//!
//! ```text
//! <PREFIX>.<NAME>:<VALUE>|<TYPE>|#<TAG1>:<VALUE1>,<TAG2>:<VALUE2>
//! ```
//!
//! - Counters are sent as `c` deltas since the last successful export; a
//!   series whose value went down (registry reset) sends its full value.
//!   Replayed counters at or below the baseline are skipped, so a stale
//!   dead-lettered value never moves the baseline backwards.
//! - Gauges are sent as `g`.
//! - Histograms and summaries send `<name>.count` and `<name>.sum` as gauges,
//!   and summaries add one gauge per quantile tagged `quantile:<q>`.
//!
//! Lines are packed into datagrams of at most `max_packet_size` bytes.

use std::collections::HashMap;
use std::net::SocketAddr;

use async_trait::async_trait;
use metricflow_core::{MetricsSink, PointValue, RegistrySnapshot, SinkError, TagSet};
use metricflow_domain::constants::SINK_STATSD;
use metricflow_domain::StatsdOptions;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::format_value;

/// Pushes snapshots to a StatsD/DogStatsD agent.
#[derive(Debug)]
pub struct StatsdSink {
    options: StatsdOptions,
    /// Last exported counter value per `name|fingerprint`.
    baselines: Mutex<HashMap<String, f64>>,
}

impl StatsdSink {
    pub fn new(options: StatsdOptions) -> Self {
        Self { options, baselines: Mutex::new(HashMap::new()) }
    }

    /// Renders `snapshot` as protocol lines plus the counter baselines to
    /// commit once the lines have been delivered.
    pub fn render(&self, snapshot: &RegistrySnapshot) -> (Vec<String>, Vec<(String, f64)>) {
        let baselines = self.baselines.lock();
        let mut lines = Vec::with_capacity(snapshot.len());
        let mut updates = Vec::new();

        for point in &snapshot.points {
            let name = self.metric_name(&point.name);
            let tags = format_tags(&point.tags, None);
            match &point.value {
                PointValue::Counter { value } => {
                    let key = format!("{}|{}", point.name, point.fingerprint());
                    let last = baselines.get(&key).copied().unwrap_or(0.0);
                    let delta = if *value >= last {
                        value - last
                    } else if snapshot.replay {
                        // Already covered by a later live export.
                        continue;
                    } else {
                        *value
                    };
                    updates.push((key, *value));
                    if delta > 0.0 {
                        lines.push(format!("{name}:{}|c{tags}", format_value(delta)));
                    }
                }
                PointValue::Gauge { value } => {
                    lines.push(format!("{name}:{}|g{tags}", format_value(*value)));
                }
                PointValue::Histogram { count, sum, .. } => {
                    lines.push(format!("{name}.count:{count}|g{tags}"));
                    lines.push(format!("{name}.sum:{}|g{tags}", format_value(*sum)));
                }
                PointValue::Summary { quantiles, count, sum } => {
                    lines.push(format!("{name}.count:{count}|g{tags}"));
                    lines.push(format!("{name}.sum:{}|g{tags}", format_value(*sum)));
                    for q in quantiles {
                        let quantile = format_value(q.quantile);
                        let tags = format_tags(&point.tags, Some(("quantile", &quantile)));
                        lines.push(format!("{name}:{}|g{tags}", format_value(q.value)));
                    }
                }
            }
        }
        (lines, updates)
    }

    fn metric_name(&self, name: &str) -> String {
        if self.options.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{name}", self.options.prefix.trim_end_matches('.'))
        }
    }

    async fn resolve(&self) -> Result<SocketAddr, SinkError> {
        tokio::net::lookup_host((self.options.host.as_str(), self.options.port))
            .await
            .map_err(|e| SinkError::Transport(format!("resolve {}: {e}", self.options.host)))?
            .next()
            .ok_or_else(|| SinkError::Transport(format!("no address for {}", self.options.host)))
    }
}

#[async_trait]
impl MetricsSink for StatsdSink {
    fn name(&self) -> &str {
        SINK_STATSD
    }

    fn is_enabled(&self) -> bool {
        self.options.enabled
    }

    async fn export(
        &self,
        snapshot: &RegistrySnapshot,
        cancel: &CancellationToken,
    ) -> Result<(), SinkError> {
        let (lines, updates) = self.render(snapshot);
        if lines.is_empty() {
            self.baselines.lock().extend(updates);
            return Ok(());
        }

        let target = self.resolve().await?;
        let bind_addr = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| SinkError::Transport(format!("bind UDP socket: {e}")))?;

        let packets = pack(&lines, self.options.max_packet_size);
        for packet in &packets {
            if cancel.is_cancelled() {
                return Err(SinkError::Cancelled);
            }
            socket
                .send_to(packet.as_bytes(), target)
                .await
                .map_err(|e| SinkError::Transport(format!("send to {target}: {e}")))?;
            trace!(bytes = packet.len(), %target, "sent StatsD packet");
        }

        self.baselines.lock().extend(updates);
        debug!(lines = lines.len(), packets = packets.len(), %target, "exported StatsD metrics");
        Ok(())
    }
}

/// Joins `lines` with newlines into packets no larger than `max_size`.
///
/// A single line longer than `max_size` is sent in a packet of its own.
fn pack(lines: &[String], max_size: usize) -> Vec<String> {
    let mut packets = Vec::new();
    let mut current = String::new();
    for line in lines {
        if line.len() > max_size {
            warn!(bytes = line.len(), max_size, "StatsD line exceeds packet size");
        }
        if !current.is_empty() && current.len() + 1 + line.len() > max_size {
            packets.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        packets.push(current);
    }
    packets
}

fn format_tags(tags: &TagSet, extra: Option<(&str, &str)>) -> String {
    if tags.is_empty() && extra.is_none() {
        return String::new();
    }
    let joined = tags
        .iter()
        .chain(extra)
        .map(|(k, v)| format!("{}:{}", clean(k), clean(v)))
        .collect::<Vec<_>>()
        .join(",");
    format!("|#{joined}")
}

/// Replaces protocol delimiters inside tag keys and values.
fn clean(raw: &str) -> String {
    raw.chars().map(|c| if matches!(c, '|' | ',' | '#' | '\n') { '_' } else { c }).collect()
}
