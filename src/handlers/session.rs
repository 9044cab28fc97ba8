use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::AppState;

use super::AppError;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportRequest {
    /// Overrides the configured test name
    #[serde(default)]
    pub test_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExportResponse {
    pub directory: PathBuf,
    pub total_requests: u64,
    pub success_rate: f64,
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub message: String,
}

// ─── POST /api/session/reset ─────────────────────────────────────

pub async fn reset_session(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ResetResponse>, AppError> {
    if state.sim_running.load(Ordering::SeqCst) {
        return Err(AppError::AlreadyRunning);
    }
    state.metrics.reset();
    Ok(Json(ResetResponse {
        message: "Metrics reset".into(),
    }))
}

// ─── POST /api/session/export ────────────────────────────────────
/// Safe mid-run: the collector is copied once, then written off the
/// async executor.

pub async fn export_session(
    State(state): State<Arc<AppState>>,
    body: Option<Json<ExportRequest>>,
) -> Result<Json<ExportResponse>, AppError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let test_name = request.test_name.unwrap_or_else(|| state.test_name.clone());
    let users = state.concurrent_users.load(Ordering::Relaxed);

    let snapshot = state.metrics.export_snapshot();
    let exporter = state.exporter.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        exporter.write_snapshot(snapshot, &test_name, users)
    })
    .await
    .map_err(|e| AppError::Internal(format!("export task failed: {e}")))??;

    Ok(Json(ExportResponse {
        directory: outcome.directory,
        total_requests: outcome.summary.total_requests,
        success_rate: outcome.summary.success_rate,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::metrics::export::SUMMARY_FILE;
    use crate::metrics::MetricsCollector;

    fn state_in(dir: &std::path::Path) -> Arc<AppState> {
        let mut config = AppConfig::default();
        config.export.results_dir = dir.to_path_buf();
        Arc::new(AppState::new(&config, Arc::new(MetricsCollector::new())))
    }

    #[tokio::test]
    async fn export_writes_named_directory() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(dir.path());
        state.metrics.record_error("general", "boom", "/api/v1/books");

        let Json(resp) = export_session(
            State(state),
            Some(Json(ExportRequest {
                test_name: Some("smoke".into()),
            })),
        )
        .await
        .unwrap();

        assert!(resp.directory.starts_with(dir.path()));
        let name = resp.directory.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("smoke_0users_"), "{name}");
        assert!(resp.directory.join(SUMMARY_FILE).exists());
    }

    #[tokio::test]
    async fn reset_refused_while_simulating() {
        let dir = tempfile::tempdir().unwrap();
        let state = state_in(dir.path());
        state.sim_running.store(true, Ordering::SeqCst);
        assert!(matches!(
            reset_session(State(state.clone())).await,
            Err(AppError::AlreadyRunning)
        ));

        state.sim_running.store(false, Ordering::SeqCst);
        assert!(reset_session(State(state)).await.is_ok());
    }
}
