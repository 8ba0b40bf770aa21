//! Per-sink circuit breakers.
//!
//! Each sink gets its own [`CircuitBreaker`], created lazily on first use.
//! Thresholds come from the `circuit_breaker.default` options unless the
//! `circuit_breaker.sinks` map carries an override for that exact sink name;
//! an override only replaces the fields it sets.
//!
//! Breaking can be switched off globally (`circuit_breaker.enabled = false`)
//! or per sink (`sinks.<name>.enabled = false`). A disabled breaker behaves as
//! permanently closed: every request is allowed and outcomes are ignored.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use metricflow_common::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState, Clock,
    ConfigResult, SystemClock,
};
use metricflow_domain::{BreakerThresholds, CircuitBreakerOptions};
use tracing::{debug, info};

/// Breaker type held per sink.
pub type SinkBreaker = CircuitBreaker<Arc<dyn Clock>>;

/// Resolves and owns the breaker of every sink.
pub struct SinkCircuitBreakerManager {
    options: CircuitBreakerOptions,
    clock: Arc<dyn Clock>,
    breakers: DashMap<String, Arc<SinkBreaker>>,
}

impl std::fmt::Debug for SinkCircuitBreakerManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkCircuitBreakerManager")
            .field("enabled", &self.options.enabled)
            .field("breakers", &self.breakers.len())
            .finish_non_exhaustive()
    }
}

impl SinkCircuitBreakerManager {
    /// Creates a manager on the system clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the default thresholds or any override resolve to
    /// an unusable configuration (zero threshold or zero cooldown).
    pub fn new(options: CircuitBreakerOptions) -> ConfigResult<Self> {
        Self::with_clock(options, Arc::new(SystemClock))
    }

    /// Creates a manager whose breakers read time from `clock`.
    ///
    /// # Errors
    ///
    /// See [`new`](Self::new).
    pub fn with_clock(options: CircuitBreakerOptions, clock: Arc<dyn Clock>) -> ConfigResult<Self> {
        thresholds_config(&options.default).validate()?;
        for name in options.sinks.keys() {
            if let Some(config) = resolve(&options, name) {
                config.validate()?;
            }
        }
        Ok(Self { options, clock, breakers: DashMap::new() })
    }

    /// A manager that never breaks.
    pub fn disabled() -> Self {
        Self {
            options: CircuitBreakerOptions { enabled: false, ..CircuitBreakerOptions::default() },
            clock: Arc::new(SystemClock),
            breakers: DashMap::new(),
        }
    }

    /// Whether breaking is switched on globally.
    pub const fn is_enabled(&self) -> bool {
        self.options.enabled
    }

    /// Effective thresholds for `sink`, or `None` when breaking is disabled
    /// for it.
    pub fn effective_config(&self, sink: &str) -> Option<CircuitBreakerConfig> {
        resolve(&self.options, sink)
    }

    /// The breaker guarding `sink`, created on first use.
    pub fn breaker(&self, sink: &str) -> Option<Arc<SinkBreaker>> {
        if let Some(existing) = self.breakers.get(sink) {
            return Some(Arc::clone(existing.value()));
        }
        let config = self.effective_config(sink)?;
        let entry = self.breakers.entry(sink.to_string()).or_insert_with(|| {
            debug!(
                sink,
                failure_threshold = config.failure_threshold,
                open_duration_secs = config.open_duration.as_secs(),
                "creating sink circuit breaker"
            );
            Arc::new(CircuitBreaker::with_clock(config, Arc::clone(&self.clock)))
        });
        Some(Arc::clone(entry.value()))
    }

    /// Asks `sink`'s breaker for permission to export.
    pub fn allow_request(&self, sink: &str) -> bool {
        self.breaker(sink).map_or(true, |breaker| breaker.allow_request())
    }

    pub fn record_success(&self, sink: &str) {
        if let Some(breaker) = self.breaker(sink) {
            breaker.record_success();
        }
    }

    pub fn record_failure(&self, sink: &str) {
        if let Some(breaker) = self.breaker(sink) {
            breaker.record_failure();
        }
    }

    /// Hands back a request `sink` was granted but never finished.
    pub fn release_probe(&self, sink: &str) {
        if let Some(breaker) = self.breaker(sink) {
            breaker.release_probe();
        }
    }

    /// Current state of `sink`'s breaker; `Closed` when breaking is off.
    pub fn state(&self, sink: &str) -> CircuitState {
        self.breaker(sink).map_or(CircuitState::Closed, |breaker| breaker.state())
    }

    pub fn consecutive_failures(&self, sink: &str) -> u32 {
        self.breaker(sink).map_or(0, |breaker| breaker.consecutive_failures())
    }

    pub fn metrics(&self, sink: &str) -> Option<CircuitBreakerMetrics> {
        self.breaker(sink).map(|breaker| breaker.metrics())
    }

    /// States of every breaker created so far, sorted by sink name.
    pub fn states(&self) -> Vec<(String, CircuitState)> {
        let mut states: Vec<(String, CircuitState)> = self
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    /// Forces every breaker back to closed.
    pub fn reset_all(&self) {
        for entry in &self.breakers {
            entry.value().reset();
        }
        info!(breakers = self.breakers.len(), "reset all sink circuit breakers");
    }
}

fn thresholds_config(thresholds: &BreakerThresholds) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: thresholds.failure_threshold,
        open_duration: Duration::from_secs(thresholds.open_duration_seconds),
    }
}

fn resolve(options: &CircuitBreakerOptions, sink: &str) -> Option<CircuitBreakerConfig> {
    if !options.enabled {
        return None;
    }
    let mut config = thresholds_config(&options.default);
    if let Some(over) = options.sinks.get(sink) {
        if !over.enabled {
            return None;
        }
        if let Some(threshold) = over.failure_threshold {
            config.failure_threshold = threshold;
        }
        if let Some(seconds) = over.open_duration_seconds {
            config.open_duration = Duration::from_secs(seconds);
        }
    }
    Some(config)
}
