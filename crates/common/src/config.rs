use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

/// Default per-analyzer weight pattern, applied cyclically when no explicit
/// weights are configured.
pub const DEFAULT_WEIGHT_CYCLE: &[f64] = &[0.4, 0.3, 0.2, 0.1];

/// Weight assigned to analyzers added by the autoscaler.
pub const DEFAULT_SCALE_OUT_WEIGHT: f64 = 0.5;

/// Coordinator configuration, read from the environment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Listen port.
    pub port: u16,
    /// Monitor tick period.
    pub monitor_interval_ms: u64,
    /// Heartbeat expiry: an in-flight task whose last heartbeat is older than
    /// this is requeued.
    pub task_timeout_ms: u64,
    /// Requeues allowed per task before it is failed outright.
    pub max_retries: u32,
    /// Default log directive when RUST_LOG is unset.
    pub log_level: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            monitor_interval_ms: 5000,
            task_timeout_ms: 30_000,
            max_retries: 3,
            log_level: "info".into(),
        }
    }
}

impl CoordinatorConfig {
    /// Read configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_parse("COORDINATOR_PORT", defaults.port),
            monitor_interval_ms: env_parse("MONITOR_INTERVAL_MS", defaults.monitor_interval_ms),
            task_timeout_ms: env_parse("TASK_TIMEOUT_MS", defaults.task_timeout_ms),
            max_retries: env_parse("MAX_RETRIES", defaults.max_retries),
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
        }
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.monitor_interval_ms == 0 {
            errors.push("monitor_interval_ms must be > 0".into());
        }
        if self.task_timeout_ms == 0 {
            errors.push("task_timeout_ms must be > 0".into());
        }

        collect(errors)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Analyzer runtime knobs, shared by every analyzer in a pool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Base URL of the coordinator.
    pub coordinator_url: String,
    /// Sleep when idle or saturated.
    pub poll_interval_ms: u64,
    /// Heartbeat refresh period while a task runs.
    pub heartbeat_interval_ms: u64,
    /// Simulated per-task work duration (test hook).
    pub processing_delay_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            coordinator_url: "http://localhost:8000".into(),
            poll_interval_ms: 1000,
            heartbeat_interval_ms: 5000,
            processing_delay_ms: 100,
        }
    }
}

impl RuntimeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn processing_delay(&self) -> Duration {
        Duration::from_millis(self.processing_delay_ms)
    }
}

/// How initial analyzer weights are assigned.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WeightSpec {
    /// Every analyzer gets the same weight.
    Uniform(f64),
    /// Explicit weights, applied cyclically past the end of the list.
    List(Vec<f64>),
}

/// Analyzer pool sizing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Analyzers started up front.
    pub initial_size: u32,
    /// Weight assignment; the default cycle applies when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<WeightSpec>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_size: 4,
            weights: None,
        }
    }
}

impl PoolConfig {
    /// Weight for the analyzer at `index`, per the configured spec.
    pub fn weight_for(&self, index: usize) -> f64 {
        match &self.weights {
            Some(WeightSpec::Uniform(w)) => *w,
            Some(WeightSpec::List(list)) if !list.is_empty() => list[index % list.len()],
            _ => DEFAULT_WEIGHT_CYCLE[index % DEFAULT_WEIGHT_CYCLE.len()],
        }
    }
}

/// Autoscaler control-loop parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AutoscalerConfig {
    /// Pool size clamp: min_size <= size <= max_size.
    pub min_size: u32,
    pub max_size: u32,
    /// Backlog depth at or above which the pool grows.
    pub scale_up_threshold: u64,
    /// Backlog depth at or below which the pool shrinks.
    pub scale_down_threshold: u64,
    pub scale_up_step: u32,
    pub scale_down_step: u32,
    /// Minimum interval between two scale actions.
    pub cooldown_ms: u64,
    /// Control-loop tick period.
    pub scale_check_interval_ms: u64,
    /// Weight given to analyzers added on scale-up.
    pub scale_out_weight: f64,
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            min_size: 1,
            max_size: 8,
            scale_up_threshold: 50,
            scale_down_threshold: 10,
            scale_up_step: 2,
            scale_down_step: 1,
            cooldown_ms: 30_000,
            scale_check_interval_ms: 10_000,
            scale_out_weight: DEFAULT_SCALE_OUT_WEIGHT,
        }
    }
}

impl AutoscalerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn scale_check_interval(&self) -> Duration {
        Duration::from_millis(self.scale_check_interval_ms)
    }
}

/// Complete analyzer-side configuration, deserialized from a TOML file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub autoscaler: AutoscalerConfig,
}

/// Load analyzer configuration from a TOML file.
pub fn load_analyzer_config(path: &Path) -> Result<AnalyzerConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| RelayError::Config(format!("failed to read {}: {}", path.display(), e)))?;

    toml::from_str(&content)
        .map_err(|e| RelayError::Config(format!("failed to parse {}: {}", path.display(), e)))
}

/// Validate the complete analyzer configuration.
///
/// Collects every violation so a misconfigured deployment sees all of its
/// problems at once, then refuses to start.
pub fn validate_analyzer(config: &AnalyzerConfig) -> Result<()> {
    let mut errors: Vec<String> = Vec::new();

    if config.runtime.coordinator_url.is_empty() {
        errors.push("runtime.coordinator_url must not be empty".into());
    }
    if config.runtime.poll_interval_ms == 0 {
        errors.push("runtime.poll_interval_ms must be > 0".into());
    }
    if config.runtime.heartbeat_interval_ms == 0 {
        errors.push("runtime.heartbeat_interval_ms must be > 0".into());
    }

    if config.pool.initial_size == 0 {
        errors.push("pool.initial_size must be > 0".into());
    }
    match &config.pool.weights {
        Some(WeightSpec::Uniform(w)) => validate_weight(*w, "pool.weights", &mut errors),
        Some(WeightSpec::List(list)) => {
            if list.is_empty() {
                errors.push("pool.weights list must not be empty".into());
            }
            for w in list {
                validate_weight(*w, "pool.weights", &mut errors);
            }
        }
        None => {}
    }

    let a = &config.autoscaler;
    if a.min_size == 0 {
        errors.push("autoscaler.min_size must be > 0".into());
    }
    if a.min_size > a.max_size {
        errors.push("autoscaler.min_size must be <= max_size".into());
    }
    if a.scale_down_threshold >= a.scale_up_threshold {
        errors.push("autoscaler.scale_down_threshold must be < scale_up_threshold".into());
    }
    if a.scale_up_step == 0 {
        errors.push("autoscaler.scale_up_step must be >= 1".into());
    }
    if a.scale_down_step == 0 {
        errors.push("autoscaler.scale_down_step must be >= 1".into());
    }
    if a.cooldown_ms == 0 {
        errors.push("autoscaler.cooldown_ms must be > 0".into());
    }
    if a.scale_check_interval_ms == 0 {
        errors.push("autoscaler.scale_check_interval_ms must be > 0".into());
    }
    validate_weight(a.scale_out_weight, "autoscaler.scale_out_weight", &mut errors);

    collect(errors)
}

fn validate_weight(w: f64, field: &str, errors: &mut Vec<String>) {
    if !(0.05..=1.0).contains(&w) {
        errors.push(format!("{} must be between 0.05 and 1.0, got {}", field, w));
    }
}

fn collect(errors: Vec<String>) -> Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(RelayError::Validation(errors.join("; ")))
    }
}
