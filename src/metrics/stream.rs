use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;

use super::percentiles::LatencyPercentiles;
use super::record::EventRecord;
use super::session::SessionResult;
use crate::AppState;

/// Live feed: the recent-request window plus its derived statistics.
#[derive(Debug, Clone, Serialize)]
pub struct RecentFeed {
    pub requests_per_second: f64,
    pub success_rate: f64,
    pub latency: LatencyPercentiles,
    pub recent_requests: Vec<EventRecord>,
}

// ─── GET /api/metrics ────────────────────────────────────────────
/// Returns a single SessionResult, handy for curl.

pub async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<SessionResult> {
    Json(state.session_result())
}

// ─── GET /api/metrics/recent ─────────────────────────────────────

pub async fn get_recent(State(state): State<Arc<AppState>>) -> Json<RecentFeed> {
    let agg = state.metrics.aggregator();
    Json(RecentFeed {
        requests_per_second: agg.current_throughput_per_second(),
        success_rate: agg.success_rate(),
        latency: agg.latency_percentiles(),
        recent_requests: agg.view().recent_requests.clone(),
    })
}

// ─── GET /api/metrics/stream ─────────────────────────────────────
/// Server-Sent Events endpoint.
/// Pushes a full `SessionResult` as JSON on every tick.

pub async fn metrics_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let interval = tokio::time::interval(state.sse_interval);

    let stream = IntervalStream::new(interval).map(move |_| {
        let result = state.session_result();
        let json = serde_json::to_string(&result).unwrap_or_default();
        Ok(Event::default().data(json))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
