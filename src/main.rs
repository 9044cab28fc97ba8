use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use llm_loadbench::config::AppConfig;
use llm_loadbench::metrics::MetricsCollector;
use llm_loadbench::{load_generator, logging, server, AppState};

#[derive(Parser, Debug)]
#[command(
    name = "llm-loadbench",
    about = "Simulated LLM API load with live metrics and result export"
)]
struct Args {
    /// JSON config file; every field is optional
    #[arg(long)]
    config: Option<PathBuf>,

    /// Serve live metrics over HTTP instead of running one batch simulation
    #[arg(long)]
    serve: bool,

    /// Address for --serve (overrides server.bind_addr)
    #[arg(long)]
    bind: Option<String>,

    /// Concurrent simulated users
    #[arg(long)]
    users: Option<u32>,

    /// Run length in seconds
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Calls per user before stopping
    #[arg(long)]
    requests_per_user: Option<u64>,

    /// Percentage of streaming calls
    #[arg(long)]
    stream_pct: Option<u8>,

    /// Multiplier for simulated latencies (0 = no sleeping)
    #[arg(long)]
    time_scale: Option<f64>,

    /// Directory that receives result folders
    #[arg(long)]
    results_dir: Option<PathBuf>,

    /// Prefix of the result folder name
    #[arg(long)]
    test_name: Option<String>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(long, short)]
    verbose: bool,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(bind) = &self.bind {
            config.server.bind_addr = bind.clone();
        }
        if let Some(users) = self.users {
            config.simulation.concurrency = users;
        }
        if let Some(secs) = self.duration_secs {
            config.simulation.duration_secs = secs;
        }
        if self.requests_per_user.is_some() {
            config.simulation.requests_per_user = self.requests_per_user;
        }
        if let Some(pct) = self.stream_pct {
            config.simulation.stream_pct = pct;
        }
        if let Some(scale) = self.time_scale {
            config.simulation.time_scale = scale;
        }
        if let Some(dir) = &self.results_dir {
            config.export.results_dir = dir.clone();
        }
        if let Some(name) = &self.test_name {
            config.export.test_name = name.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(if args.verbose { "debug" } else { "info" });

    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;

    let metrics = Arc::new(MetricsCollector::with_config(config.collector.clone()));
    let state = Arc::new(AppState::new(&config, metrics));

    if args.serve {
        serve(state, &config.server.bind_addr).await
    } else {
        run_once(state).await
    }
}

/// One simulated run, then export and a short console summary.
async fn run_once(state: Arc<AppState>) -> Result<()> {
    let users = state.simulation.concurrency;
    state.concurrent_users.store(users, Ordering::Relaxed);
    state.sim_running.store(true, Ordering::SeqCst);

    load_generator::run(
        state.sim_running.clone(),
        state.metrics.clone(),
        state.simulation.clone(),
    )
    .await;

    let exporter = state.exporter.clone();
    let metrics = state.metrics.clone();
    let test_name = state.test_name.clone();
    let outcome =
        tokio::task::spawn_blocking(move || exporter.export(&metrics, &test_name, users))
            .await
            .context("export task panicked")??;

    let s = &outcome.summary;
    info!(
        total_requests = s.total_requests,
        success = s.success_count,
        failure = s.failure_count,
        timeouts = s.timeout_count,
        success_rate = s.success_rate,
        tokens_per_sec = s.avg_tokens_per_second,
        "run complete"
    );
    println!("Results written to {}", outcome.directory.display());
    Ok(())
}

async fn serve(state: Arc<AppState>, addr: &str) -> Result<()> {
    let app = server::create_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(%addr, "live metrics server listening");
    info!("metrics JSON → http://{addr}/api/metrics");
    info!("metrics SSE  → http://{addr}/api/metrics/stream");

    axum::serve(listener, app)
        .await
        .context("server exited with error")
}
