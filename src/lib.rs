pub mod config;
pub mod error;
pub mod handlers;
pub mod load_generator;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod server;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use config::{AppConfig, SimulationConfig};
use metrics::{MetricsCollector, ResultExporter, SessionResult};

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    /// Central metrics engine. Workers push records and readers take snapshots.
    pub metrics: Arc<MetricsCollector>,

    /// Writes result directories on demand and at the end of a run.
    pub exporter: ResultExporter,

    /// Prefix for exported result directories.
    pub test_name: String,

    /// Defaults for simulated runs started over HTTP.
    pub simulation: SimulationConfig,

    /// Interval between SSE snapshot pushes.
    pub sse_interval: Duration,

    /// User count echoed into every session result.
    pub concurrent_users: AtomicU32,

    /// Flag checked by every simulated worker on each iteration.
    pub sim_running: Arc<AtomicBool>,

    /// Handle to the spawned simulator task so we can await clean shutdown.
    pub sim_handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl AppState {
    pub fn new(config: &AppConfig, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            metrics,
            exporter: ResultExporter::from_config(&config.export),
            test_name: config.export.test_name.clone(),
            simulation: config.simulation.clone(),
            sse_interval: Duration::from_millis(config.server.sse_interval_ms.max(1)),
            concurrent_users: AtomicU32::new(0),
            sim_running: Arc::new(AtomicBool::new(false)),
            sim_handle: tokio::sync::Mutex::new(None),
        }
    }

    pub fn session_result(&self) -> SessionResult {
        self.metrics
            .session_result(self.concurrent_users.load(Ordering::Relaxed))
    }
}
