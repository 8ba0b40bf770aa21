//! Integration tests for configuration loader
//!
//! Tests the end-to-end behavior of loading configuration from files and
//! building pipeline components from it.

use std::io::Write;
use std::time::Duration;

use metricflow_common::resilience::CircuitState;
use metricflow_domain::OverflowPolicy;
use metricflow_infra::{
    build_sinks, config, retry_policy_from, FlushSchedulerConfig, ReprocessorConfig,
    SinkCircuitBreakerManager,
};
use tempfile::NamedTempFile;

const TOML_CONFIG: &str = r#"
service_name = "payments"
environment = "prod"
flush_interval_ms = 5000
export_timeout_ms = 2000

[global_tags]
team = "core"

[bus]
capacity = 512
overflow = "drop_newest"

[retry_policy]
max_retries = 2
initial_delay_ms = 50

[circuit_breaker.default]
failure_threshold = 4

[circuit_breaker.sinks.StatsD]
enabled = false

[dead_letter_queue]
max_size = 200
batch_size = 20
max_reprocess_attempts = 3

[prometheus]
enabled = false

[statsd]
enabled = true
prefix = "payments"

[kafka]
enabled = true
topic = "payments-metrics"
"#;

fn write_config(contents: &str, suffix: &str) -> NamedTempFile {
    let mut file =
        tempfile::Builder::new().suffix(suffix).tempfile().expect("Failed to create temp file");
    file.write_all(contents.as_bytes()).expect("Failed to write to temp file");
    file
}

#[test]
fn test_load_config_from_toml_file() {
    let file = write_config(TOML_CONFIG, ".toml");

    let options =
        config::load_from_file(Some(file.path().to_path_buf())).expect("config should load");

    assert_eq!(options.service_name, "payments");
    assert_eq!(options.environment, "prod");
    assert_eq!(options.global_tags.get("team").map(String::as_str), Some("core"));
    assert_eq!(options.flush_interval(), Duration::from_secs(5));
    assert_eq!(options.bus.capacity, 512);
    assert_eq!(options.bus.overflow, OverflowPolicy::DropNewest);
    assert_eq!(options.dead_letter_queue.max_reprocess_attempts, Some(3));
    assert!(!options.prometheus.enabled);
}

/// Validates a loaded file drives every component built from it.
#[test]
fn test_components_built_from_loaded_config() -> anyhow::Result<()> {
    let file = write_config(TOML_CONFIG, ".toml");
    let options = config::load_from_file(Some(file.path().to_path_buf()))?;

    let flush = FlushSchedulerConfig::from_options(&options);
    assert_eq!(flush.interval, Duration::from_secs(5));
    assert_eq!(flush.export_timeout, Duration::from_secs(2));
    assert_eq!(flush.drain_batch, 512);

    let reprocess = ReprocessorConfig::from_options(&options);
    assert_eq!(reprocess.batch_size, 20);
    assert_eq!(reprocess.max_reprocess_attempts, Some(3));

    let retry = retry_policy_from(&options.retry_policy)?;
    assert_eq!(retry.max_retries, 2);
    assert_eq!(retry.initial_delay, Duration::from_millis(50));

    let breakers = SinkCircuitBreakerManager::new(options.circuit_breaker.clone())?;
    assert!(breakers.effective_config("StatsD").is_none());
    assert_eq!(breakers.effective_config("Kafka").map(|c| c.failure_threshold), Some(4));
    for _ in 0..10 {
        breakers.record_failure("StatsD");
    }
    assert_eq!(breakers.state("StatsD"), CircuitState::Closed);

    let sinks = build_sinks(&options)?;
    let names: Vec<&str> = sinks.iter().map(|sink| sink.name()).collect();
    assert_eq!(names, vec!["StatsD", "Kafka"]);
    Ok(())
}

#[test]
fn test_load_config_from_json_file() {
    let file = write_config(
        r#"{
            "service_name": "search",
            "dead_letter_queue": { "enabled": false },
            "influxdb": { "enabled": true, "org": "acme", "token": "secret" }
        }"#,
        ".json",
    );

    let options =
        config::load_from_file(Some(file.path().to_path_buf())).expect("config should load");

    assert_eq!(options.service_name, "search");
    assert!(!options.dead_letter_queue.enabled);
    assert_eq!(options.influxdb.org, "acme");
    assert_eq!(options.influxdb.token.as_deref(), Some("secret"));

    let serialized = serde_json::to_string(&options).expect("options serialize");
    assert!(!serialized.contains("secret"), "token must not be serialized");
}

#[test]
fn test_invalid_config_is_rejected() {
    let file = write_config("[bus]\ncapacity = 0\n", ".toml");

    let result = config::load_from_file(Some(file.path().to_path_buf()));
    assert!(result.is_err());
}
