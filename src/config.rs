use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Top-level configuration. Every section and field is optional in the
/// JSON file; missing values fall back to the defaults below.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub collector: CollectorConfig,
    pub export: ExportConfig,
    pub simulation: SimulationConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.collector.validate()?;
        self.simulation.validate()?;
        Ok(())
    }
}

// ─── Collector ───────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    /// Full request records kept for live throughput
    #[serde(default = "default_recent_requests")]
    pub recent_requests_capacity: usize,

    /// TTFT / TTCT samples kept for live percentiles
    #[serde(default = "default_latency_window")]
    pub latency_window_capacity: usize,

    /// Trailing window used by the throughput estimate (seconds)
    #[serde(default = "default_throughput_window")]
    pub throughput_window_secs: u64,
}

fn default_recent_requests() -> usize {
    1000
}
fn default_latency_window() -> usize {
    100
}
fn default_throughput_window() -> u64 {
    60
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            recent_requests_capacity: default_recent_requests(),
            latency_window_capacity: default_latency_window(),
            throughput_window_secs: default_throughput_window(),
        }
    }
}

impl CollectorConfig {
    pub fn throughput_window(&self) -> Duration {
        Duration::from_secs(self.throughput_window_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recent_requests_capacity == 0 {
            return Err(ConfigError::Invalid(
                "collector.recent_requests_capacity must be greater than zero".into(),
            ));
        }
        if self.latency_window_capacity == 0 {
            return Err(ConfigError::Invalid(
                "collector.latency_window_capacity must be greater than zero".into(),
            ));
        }
        if self.throughput_window_secs == 0 {
            return Err(ConfigError::Invalid(
                "collector.throughput_window_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

// ─── Export ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    /// Prefix of every result directory name
    #[serde(default = "default_test_name")]
    pub test_name: String,
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("data/results")
}
fn default_test_name() -> String {
    "load_test".into()
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            results_dir: default_results_dir(),
            test_name: default_test_name(),
        }
    }
}

// ─── Simulation ──────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    /// Number of concurrent simulated users
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// How long the run lasts (seconds)
    #[serde(default = "default_duration")]
    pub duration_secs: u64,

    /// Stop each user after this many calls; `None` runs until the deadline
    #[serde(default)]
    pub requests_per_user: Option<u64>,

    /// Percentage of calls that are streaming (0–100)
    #[serde(default = "default_stream_pct")]
    pub stream_pct: u8,

    /// Percentage of streaming completions reported twice (0–100)
    #[serde(default = "default_duplicate_pct")]
    pub duplicate_completion_pct: u8,

    #[serde(default = "default_stream_success_rate")]
    pub stream_success_rate: f64,

    #[serde(default = "default_regular_success_rate")]
    pub regular_success_rate: f64,

    /// Multiplier applied to every simulated sleep; 0 disables sleeping
    #[serde(default = "default_time_scale")]
    pub time_scale: f64,
}

fn default_concurrency() -> u32 {
    10
}
fn default_duration() -> u64 {
    30
}
fn default_stream_pct() -> u8 {
    60
}
fn default_duplicate_pct() -> u8 {
    10
}
fn default_stream_success_rate() -> f64 {
    0.95
}
fn default_regular_success_rate() -> f64 {
    0.98
}
fn default_time_scale() -> f64 {
    1.0
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            duration_secs: default_duration(),
            requests_per_user: None,
            stream_pct: default_stream_pct(),
            duplicate_completion_pct: default_duplicate_pct(),
            stream_success_rate: default_stream_success_rate(),
            regular_success_rate: default_regular_success_rate(),
            time_scale: default_time_scale(),
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 || self.concurrency > 1000 {
            return Err(ConfigError::Invalid(
                "concurrency must be between 1 and 1000".into(),
            ));
        }
        if self.duration_secs == 0 || self.duration_secs > 3600 {
            return Err(ConfigError::Invalid(
                "duration_secs must be between 1 and 3600".into(),
            ));
        }
        if self.requests_per_user == Some(0) {
            return Err(ConfigError::Invalid(
                "requests_per_user must be greater than zero when set".into(),
            ));
        }
        if self.stream_pct > 100 || self.duplicate_completion_pct > 100 {
            return Err(ConfigError::Invalid(
                "stream_pct and duplicate_completion_pct must be between 0 and 100".into(),
            ));
        }
        for (name, rate) in [
            ("stream_success_rate", self.stream_success_rate),
            ("regular_success_rate", self.regular_success_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be between 0.0 and 1.0"
                )));
            }
        }
        if !self.time_scale.is_finite() || self.time_scale < 0.0 {
            return Err(ConfigError::Invalid(
                "time_scale must be a non-negative number".into(),
            ));
        }
        Ok(())
    }
}

// ─── Server ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Interval between SSE snapshot pushes (milliseconds)
    #[serde(default = "default_sse_interval")]
    pub sse_interval_ms: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".into()
}
fn default_sse_interval() -> u64 {
    500
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            sse_interval_ms: default_sse_interval(),
        }
    }
}
