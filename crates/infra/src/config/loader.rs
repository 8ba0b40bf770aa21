//! Configuration loader
//!
//! Loads [`MetricsOptions`] from a config file and `METRICFLOW_*`
//! environment variables.
//!
//! ## Loading Strategy
//! 1. A `.env` file in the working directory is applied to the process
//!    environment when present (`dotenvy`)
//! 2. The first config file found by [`probe_config_paths`] is parsed; without
//!    one, defaults are used
//! 3. Environment variables override individual fields
//! 4. The merged options are validated
//!
//! ## Environment Variables
//! | variable | field |
//! |---|---|
//! | `METRICFLOW_ENABLED` | `enabled` |
//! | `METRICFLOW_SERVICE_NAME` | `service_name` |
//! | `METRICFLOW_ENVIRONMENT` | `environment` |
//! | `METRICFLOW_FLUSH_INTERVAL_MS` | `flush_interval_ms` |
//! | `METRICFLOW_EXPORT_TIMEOUT_MS` | `export_timeout_ms` |
//! | `METRICFLOW_BUS_CAPACITY` | `bus.capacity` |
//! | `METRICFLOW_RETRY_ENABLED` | `retry_policy.enabled` |
//! | `METRICFLOW_RETRY_MAX_RETRIES` | `retry_policy.max_retries` |
//! | `METRICFLOW_RETRY_INITIAL_DELAY_MS` | `retry_policy.initial_delay_ms` |
//! | `METRICFLOW_CIRCUIT_BREAKER_ENABLED` | `circuit_breaker.enabled` |
//! | `METRICFLOW_CIRCUIT_BREAKER_FAILURE_THRESHOLD` | `circuit_breaker.default.failure_threshold` |
//! | `METRICFLOW_CIRCUIT_BREAKER_OPEN_DURATION_SECONDS` | `circuit_breaker.default.open_duration_seconds` |
//! | `METRICFLOW_DLQ_ENABLED` | `dead_letter_queue.enabled` |
//! | `METRICFLOW_DLQ_MAX_SIZE` | `dead_letter_queue.max_size` |
//! | `METRICFLOW_DLQ_PROCESSING_INTERVAL_MS` | `dead_letter_queue.processing_interval_ms` |
//! | `METRICFLOW_DLQ_BATCH_SIZE` | `dead_letter_queue.batch_size` |
//! | `METRICFLOW_PROMETHEUS_ENABLED` | `prometheus.enabled` |
//! | `METRICFLOW_OTLP_ENABLED` / `_ENDPOINT` | `otlp.*` |
//! | `METRICFLOW_STATSD_ENABLED` / `_HOST` / `_PORT` / `_PREFIX` | `statsd.*` |
//! | `METRICFLOW_KAFKA_ENABLED` / `_BOOTSTRAP_SERVERS` / `_TOPIC` | `kafka.*` |
//! | `METRICFLOW_INFLUXDB_ENABLED` / `_URL` / `_ORG` / `_BUCKET` / `_TOKEN` | `influxdb.*` |
//! | `METRICFLOW_LOG_LEVEL` / `METRICFLOW_LOG_JSON` | `logging.*` |
//!
//! Booleans accept `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off`
//! (case-insensitive). A malformed value is a `MetricsError::Config`.
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `$METRICFLOW_CONFIG`
//! 2. `./metricflow.toml`
//! 3. `./config/metricflow.toml`
//! 4. `./metricflow.json`
//! 5. `metricflow.toml` next to the executable

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use metricflow_domain::{MetricsError, MetricsOptions, Result};

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "METRICFLOW_CONFIG";

/// Load configuration with automatic fallback strategy
///
/// Reads `.env`, the first config file found (or defaults), then applies
/// environment overrides and validates.
///
/// # Errors
/// Returns `MetricsError::Config` if a file or variable is malformed or the
/// merged options fail validation.
pub fn load() -> Result<MetricsOptions> {
    if let Ok(path) = dotenvy::dotenv() {
        tracing::debug!(path = %path.display(), "Applied .env file");
    }

    let mut options = match probe_config_paths() {
        Some(path) => read_file(&path)?,
        None => {
            tracing::debug!("No config file found, starting from defaults");
            MetricsOptions::default()
        }
    };
    apply_env_overrides(&mut options, |key| std::env::var(key).ok())?;
    options.validate()?;

    tracing::info!(
        service = %options.service_name,
        environment = %options.environment,
        flush_interval_ms = options.flush_interval_ms,
        "Metrics configuration loaded"
    );
    Ok(options)
}

/// Load configuration from defaults plus environment variables
///
/// # Errors
/// Returns `MetricsError::Config` if a variable has an invalid value or the
/// result fails validation.
pub fn load_from_env() -> Result<MetricsOptions> {
    let mut options = MetricsOptions::default();
    apply_env_overrides(&mut options, |key| std::env::var(key).ok())?;
    options.validate()?;
    Ok(options)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes the standard locations. Supports TOML and
/// JSON (detected by file extension).
///
/// # Errors
/// Returns `MetricsError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
/// - The parsed options fail validation
///
/// Returns `MetricsError::Io` if the file exists but cannot be read.
pub fn load_from_file(path: Option<PathBuf>) -> Result<MetricsOptions> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(MetricsError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            MetricsError::Config(
                "No config file found in any of the standard locations".to_string(),
            )
        })?,
    };

    let options = read_file(&config_path)?;
    options.validate()?;
    Ok(options)
}

fn read_file(path: &Path) -> Result<MetricsOptions> {
    tracing::info!(path = %path.display(), "Loading configuration from file");
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents, path)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.toml` or `.json`; no extension
/// means JSON).
///
/// # Errors
/// Returns `MetricsError::Config` if the format is unsupported or parsing
/// fails.
pub fn parse_config(contents: &str, path: &Path) -> Result<MetricsOptions> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| MetricsError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| MetricsError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(MetricsError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// Probe the standard locations for a configuration file
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(explicit) = std::env::var(CONFIG_PATH_ENV) {
        candidates.push(PathBuf::from(explicit));
    }

    if let Ok(cwd) = std::env::current_dir() {
        candidates.extend([
            cwd.join("metricflow.toml"),
            cwd.join("config").join("metricflow.toml"),
            cwd.join("metricflow.json"),
        ]);
    }

    if let Some(exe_dir) = std::env::current_exe().ok().as_deref().and_then(Path::parent) {
        candidates.push(exe_dir.join("metricflow.toml"));
    }

    candidates.into_iter().find(|path| path.exists())
}

/// Applies `METRICFLOW_*` overrides read through `lookup`.
///
/// # Errors
/// Returns `MetricsError::Config` naming the first malformed variable.
pub fn apply_env_overrides<F>(options: &mut MetricsOptions, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvSource { lookup };

    env.flag("METRICFLOW_ENABLED", &mut options.enabled)?;
    env.string("METRICFLOW_SERVICE_NAME", &mut options.service_name);
    env.string("METRICFLOW_ENVIRONMENT", &mut options.environment);
    env.parse("METRICFLOW_FLUSH_INTERVAL_MS", &mut options.flush_interval_ms)?;
    env.parse("METRICFLOW_EXPORT_TIMEOUT_MS", &mut options.export_timeout_ms)?;
    env.parse("METRICFLOW_BUS_CAPACITY", &mut options.bus.capacity)?;

    let retry = &mut options.retry_policy;
    env.flag("METRICFLOW_RETRY_ENABLED", &mut retry.enabled)?;
    env.parse("METRICFLOW_RETRY_MAX_RETRIES", &mut retry.max_retries)?;
    env.parse("METRICFLOW_RETRY_INITIAL_DELAY_MS", &mut retry.initial_delay_ms)?;

    let breaker = &mut options.circuit_breaker;
    env.flag("METRICFLOW_CIRCUIT_BREAKER_ENABLED", &mut breaker.enabled)?;
    env.parse(
        "METRICFLOW_CIRCUIT_BREAKER_FAILURE_THRESHOLD",
        &mut breaker.default.failure_threshold,
    )?;
    env.parse(
        "METRICFLOW_CIRCUIT_BREAKER_OPEN_DURATION_SECONDS",
        &mut breaker.default.open_duration_seconds,
    )?;

    let dlq = &mut options.dead_letter_queue;
    env.flag("METRICFLOW_DLQ_ENABLED", &mut dlq.enabled)?;
    env.parse("METRICFLOW_DLQ_MAX_SIZE", &mut dlq.max_size)?;
    env.parse("METRICFLOW_DLQ_PROCESSING_INTERVAL_MS", &mut dlq.processing_interval_ms)?;
    env.parse("METRICFLOW_DLQ_BATCH_SIZE", &mut dlq.batch_size)?;

    env.flag("METRICFLOW_PROMETHEUS_ENABLED", &mut options.prometheus.enabled)?;

    env.flag("METRICFLOW_OTLP_ENABLED", &mut options.otlp.enabled)?;
    env.string("METRICFLOW_OTLP_ENDPOINT", &mut options.otlp.endpoint);

    let statsd = &mut options.statsd;
    env.flag("METRICFLOW_STATSD_ENABLED", &mut statsd.enabled)?;
    env.string("METRICFLOW_STATSD_HOST", &mut statsd.host);
    env.parse("METRICFLOW_STATSD_PORT", &mut statsd.port)?;
    env.string("METRICFLOW_STATSD_PREFIX", &mut statsd.prefix);

    let kafka = &mut options.kafka;
    env.flag("METRICFLOW_KAFKA_ENABLED", &mut kafka.enabled)?;
    env.string("METRICFLOW_KAFKA_BOOTSTRAP_SERVERS", &mut kafka.bootstrap_servers);
    env.string("METRICFLOW_KAFKA_TOPIC", &mut kafka.topic);

    let influx = &mut options.influxdb;
    env.flag("METRICFLOW_INFLUXDB_ENABLED", &mut influx.enabled)?;
    env.string("METRICFLOW_INFLUXDB_URL", &mut influx.url);
    env.string("METRICFLOW_INFLUXDB_ORG", &mut influx.org);
    env.string("METRICFLOW_INFLUXDB_BUCKET", &mut influx.bucket);
    if let Some(token) = (env.lookup)("METRICFLOW_INFLUXDB_TOKEN") {
        influx.token = Some(token);
    }

    env.string("METRICFLOW_LOG_LEVEL", &mut options.logging.level);
    env.flag("METRICFLOW_LOG_JSON", &mut options.logging.json)?;

    Ok(())
}

struct EnvSource<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvSource<F> {
    fn string(&self, key: &str, target: &mut String) {
        if let Some(value) = (self.lookup)(key) {
            *target = value;
        }
    }

    fn parse<T>(&self, key: &str, target: &mut T) -> Result<()>
    where
        T: FromStr,
        T::Err: Display,
    {
        if let Some(raw) = (self.lookup)(key) {
            *target = raw.trim().parse().map_err(|e| {
                MetricsError::Config(format!("Invalid value for {key} ('{raw}'): {e}"))
            })?;
        }
        Ok(())
    }

    fn flag(&self, key: &str, target: &mut bool) -> Result<()> {
        if let Some(raw) = (self.lookup)(key) {
            *target = parse_bool(&raw).ok_or_else(|| {
                MetricsError::Config(format!("Invalid boolean for {key}: '{raw}'"))
            })?;
        }
        Ok(())
    }
}

/// Parse a boolean flag
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::Mutex;

    use metricflow_domain::OverflowPolicy;

    use super::*;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_parse_bool() {
        for raw in ["1", "true", "YES", "On"] {
            assert_eq!(parse_bool(raw), Some(true), "{raw}");
        }
        for raw in ["0", "false", "no", "OFF"] {
            assert_eq!(parse_bool(raw), Some(false), "{raw}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    /// Validates overrides replace only the variables that are set.
    #[test]
    fn test_env_overrides_apply() {
        let mut options = MetricsOptions::default();
        apply_env_overrides(
            &mut options,
            lookup(&[
                ("METRICFLOW_SERVICE_NAME", "checkout"),
                ("METRICFLOW_FLUSH_INTERVAL_MS", "2500"),
                ("METRICFLOW_RETRY_MAX_RETRIES", "1"),
                ("METRICFLOW_STATSD_ENABLED", "yes"),
                ("METRICFLOW_STATSD_PORT", "9125"),
                ("METRICFLOW_INFLUXDB_TOKEN", "t0ken"),
                ("METRICFLOW_LOG_JSON", "true"),
            ]),
        )
        .unwrap();

        assert_eq!(options.service_name, "checkout");
        assert_eq!(options.flush_interval_ms, 2_500);
        assert_eq!(options.retry_policy.max_retries, 1);
        assert!(options.statsd.enabled);
        assert_eq!(options.statsd.port, 9_125);
        assert_eq!(options.influxdb.token.as_deref(), Some("t0ken"));
        assert!(options.logging.json);
        assert_eq!(options.environment, "development");
    }

    #[test]
    fn test_env_override_invalid_number() {
        let mut options = MetricsOptions::default();
        let env = lookup(&[("METRICFLOW_BUS_CAPACITY", "lots")]);
        let err = apply_env_overrides(&mut options, env).unwrap_err();
        assert!(
            matches!(err, MetricsError::Config(ref msg) if msg.contains("METRICFLOW_BUS_CAPACITY"))
        );
    }

    #[test]
    fn test_env_override_invalid_bool() {
        let mut options = MetricsOptions::default();
        let env = lookup(&[("METRICFLOW_OTLP_ENABLED", "sure")]);
        let err = apply_env_overrides(&mut options, env).unwrap_err();
        assert!(matches!(err, MetricsError::Config(_)));
    }

    /// Validates load_from_env reads the process environment and validates.
    #[test]
    fn test_load_from_env_validates() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        std::env::set_var("METRICFLOW_DLQ_MAX_SIZE", "25");
        let options = load_from_env().unwrap();
        assert_eq!(options.dead_letter_queue.max_size, 25);

        std::env::set_var("METRICFLOW_DLQ_MAX_SIZE", "0");
        assert!(matches!(load_from_env(), Err(MetricsError::Config(_))));

        std::env::remove_var("METRICFLOW_DLQ_MAX_SIZE");
    }

    #[test]
    fn test_load_from_file_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
service_name = "billing"
flush_interval_ms = 1000

[bus]
overflow = "drop_newest"

[circuit_breaker.sinks.Kafka]
failure_threshold = 2

[statsd]
enabled = true
prefix = "billing"
"#
        )
        .unwrap();

        let options = load_from_file(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(options.service_name, "billing");
        assert_eq!(options.flush_interval_ms, 1_000);
        assert_eq!(options.bus.overflow, OverflowPolicy::DropNewest);
        assert_eq!(options.circuit_breaker.sinks["Kafka"].failure_threshold, Some(2));
        assert!(options.circuit_breaker.sinks["Kafka"].enabled);
        assert!(options.statsd.enabled);
        assert_eq!(options.statsd.prefix, "billing");
        assert_eq!(options.kafka.topic, "metrics");
    }

    #[test]
    fn test_load_from_file_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{ "retry_policy": {{ "max_retries": 5 }}, "otlp": {{ "enabled": true }} }}"#
        )
        .unwrap();

        let options = load_from_file(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(options.retry_policy.max_retries, 5);
        assert!(options.otlp.enabled);
    }

    #[test]
    fn test_load_from_file_rejects_invalid_values() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[retry_policy]\nbackoff_multiplier = 0.5").unwrap();

        assert!(matches!(
            load_from_file(Some(file.path().to_path_buf())),
            Err(MetricsError::Config(ref msg)) if msg.contains("backoff_multiplier")
        ));
    }

    #[test]
    fn test_load_from_file_missing() {
        let result = load_from_file(Some(PathBuf::from("/definitely/not/here/metricflow.toml")));
        assert!(matches!(result, Err(MetricsError::Config(ref msg)) if msg.contains("not found")));
    }

    /// Validates an existing but unreadable path is an I/O error, not a
    /// config error.
    #[test]
    fn test_load_from_file_unreadable_is_io() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metricflow.toml");
        std::fs::create_dir(&path).unwrap();

        let result = load_from_file(Some(path));
        assert!(matches!(result, Err(MetricsError::Io(_))));
    }

    #[test]
    fn test_parse_config_unsupported_extension() {
        let result = parse_config("a: 1", Path::new("metricflow.yaml"));
        assert!(matches!(result, Err(MetricsError::Config(ref msg)) if msg.contains("yaml")));
    }

    #[test]
    fn test_parse_config_invalid_toml() {
        let result = parse_config("flush_interval_ms = \"soon\"", Path::new("metricflow.toml"));
        assert!(matches!(result, Err(MetricsError::Config(ref msg)) if msg.contains("TOML")));
    }
}
