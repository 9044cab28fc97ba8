use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::handlers;
use crate::metrics::stream;
use crate::middleware::timing;
use crate::AppState;

/// Builds the full Axum `Router` with all routes and middleware.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // ── Metrics ─────────────────────────────────────────────
        .route("/api/metrics", get(stream::get_metrics))
        .route("/api/metrics/recent", get(stream::get_recent))
        .route("/api/metrics/stream", get(stream::metrics_stream))
        // ── Session control ─────────────────────────────────────
        .route(
            "/api/session/reset",
            post(handlers::session::reset_session),
        )
        .route(
            "/api/session/export",
            post(handlers::session::export_session),
        )
        // ── Simulation control ──────────────────────────────────
        .route(
            "/api/simulation/start",
            post(handlers::simulation::start_simulation),
        )
        .route(
            "/api/simulation/stop",
            post(handlers::simulation::stop_simulation),
        )
        .route(
            "/api/simulation/status",
            get(handlers::simulation::simulation_status),
        )
        // ── Provide shared state to all routes above ────────────
        .with_state(state)
        // ── Global middleware (applied bottom-up) ───────────────
        .layer(axum_mw::from_fn(timing::timing_middleware))
        .layer(CorsLayer::permissive())
}
