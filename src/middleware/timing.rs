use axum::{
    extract::Request,
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Long-lived SSE route; its duration says nothing about handler cost.
const STREAM_PATH: &str = "/api/metrics/stream";

/// Times every control and metrics call.
///
/// Adds `Server-Timing: handler;dur=<ms>` and marks metrics responses
/// `Cache-Control: no-store`, since each one is a fresh snapshot of a
/// running session. The SSE route passes through untouched.
pub async fn timing_middleware(req: Request, next: Next) -> Response {
    let path = req.uri().path().to_owned();
    if path == STREAM_PATH {
        return next.run(req).await;
    }
    let method = req.method().clone();

    let start = Instant::now();
    let mut response = next.run(req).await;
    let elapsed = start.elapsed();

    decorate(&path, elapsed, response.headers_mut());

    let status = response.status().as_u16();
    let elapsed_us = elapsed.as_micros() as u64;
    if response.status().is_server_error() {
        warn!(status, %method, %path, elapsed_us, "api call failed");
    } else {
        debug!(status, %method, %path, elapsed_us, "api call");
    }

    response
}

fn decorate(path: &str, elapsed: Duration, headers: &mut HeaderMap) {
    let timing = format!("handler;dur={:.3}", elapsed.as_secs_f64() * 1000.0);
    if let Ok(val) = HeaderValue::from_str(&timing) {
        headers.insert("server-timing", val);
    }
    if path.starts_with("/api/metrics") {
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    }
}
