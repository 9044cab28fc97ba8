use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::config::SimulationConfig;
use crate::AppState;

use super::AppError;

// ─── Request / response types ────────────────────────────────────

/// Overrides for one simulated run; unset fields keep the server's
/// configured simulation defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartRequest {
    pub concurrency: Option<u32>,
    pub duration_secs: Option<u64>,
    pub requests_per_user: Option<u64>,
    pub stream_pct: Option<u8>,
    pub time_scale: Option<f64>,
    /// Keep the current metrics instead of starting a clean session
    #[serde(default)]
    pub keep_metrics: bool,
}

impl StartRequest {
    fn apply(&self, base: &SimulationConfig) -> SimulationConfig {
        let mut config = base.clone();
        if let Some(v) = self.concurrency {
            config.concurrency = v;
        }
        if let Some(v) = self.duration_secs {
            config.duration_secs = v;
        }
        if self.requests_per_user.is_some() {
            config.requests_per_user = self.requests_per_user;
        }
        if let Some(v) = self.stream_pct {
            config.stream_pct = v;
        }
        if let Some(v) = self.time_scale {
            config.time_scale = v;
        }
        config
    }
}

#[derive(Debug, Serialize)]
pub struct SimulationStatus {
    pub running: bool,
    pub message: String,
}

// ─── POST /api/simulation/start ──────────────────────────────────

pub async fn start_simulation(
    State(state): State<Arc<AppState>>,
    body: Option<Json<StartRequest>>,
) -> Result<Json<SimulationStatus>, AppError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let config = request.apply(&state.simulation);
    config.validate()?;

    // Start and stop are serialized on the handle lock, so a start can
    // never re-arm the flag while a previous run's workers are alive.
    let mut guard = state.sim_handle.lock().await;
    if state
        .sim_running
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(AppError::AlreadyRunning);
    }
    if let Some(previous) = guard.take() {
        // A run that ended on its own; its workers were joined before
        // it cleared the flag
        let _ = previous.await;
    }

    if !request.keep_metrics {
        state.metrics.reset();
    }
    state
        .concurrent_users
        .store(config.concurrency, Ordering::Relaxed);

    let msg = format!(
        "Started: {} users × {}s, {}% streaming",
        config.concurrency, config.duration_secs, config.stream_pct,
    );

    let running = state.sim_running.clone();
    let metrics = state.metrics.clone();

    *guard = Some(tokio::spawn(async move {
        crate::load_generator::run(running, metrics, config).await;
    }));

    Ok(Json(SimulationStatus {
        running: true,
        message: msg,
    }))
}

// ─── POST /api/simulation/stop ───────────────────────────────────

pub async fn stop_simulation(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SimulationStatus>, AppError> {
    let mut guard = state.sim_handle.lock().await;
    let was_running = state.sim_running.swap(false, Ordering::SeqCst);

    // Await the simulator task so we know it's fully stopped
    if let Some(handle) = guard.take() {
        // JoinError is fine here, the task may have already finished
        let _ = handle.await;
    }

    Ok(Json(SimulationStatus {
        running: false,
        message: if was_running {
            "Simulation stopped".into()
        } else {
            "No simulation is running".into()
        },
    }))
}

// ─── GET /api/simulation/status ──────────────────────────────────

pub async fn simulation_status(State(state): State<Arc<AppState>>) -> Json<SimulationStatus> {
    let running = state.sim_running.load(Ordering::SeqCst);
    Json(SimulationStatus {
        running,
        message: if running {
            "Simulation in progress".into()
        } else {
            "Idle".into()
        },
    })
}
