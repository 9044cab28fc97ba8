use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::SimulationConfig;
use crate::error::RecordError;
use crate::metrics::{MetricsCollector, RequestOutcome, StreamCompletion};

const STREAM_ENDPOINTS: &[&str] = &[
    "/api/v1/generate_content",
    "/api/v1/generate_chapter_outline",
    "/api/v1/expand_text",
];

const REGULAR_ENDPOINTS: &[&str] = &[
    "/api/v1/books",
    "/api/v1/chapters",
    "/api/v1/user/info",
    "/api/v1/settings",
];

const STREAM_ERROR_TYPES: &[&str] = &["timeout", "server_error", "rate_limit"];
const STREAM_FAILURE_CODES: &[u16] = &[429, 500, 503];
const REGULAR_ERROR_TYPES: &[&str] = &["timeout", "network"];
const REGULAR_FAILURE_CODES: &[u16] = &[400, 401, 404, 429, 500];

// ─── Public entry point ──────────────────────────────────────────

/// Spawns `config.concurrency` Tokio tasks that play simulated users
/// against the collector until the deadline, the per-user request
/// budget, or the `running` flag is set to false.
pub async fn run(
    running: Arc<AtomicBool>,
    metrics: Arc<MetricsCollector>,
    config: SimulationConfig,
) {
    let deadline = Instant::now() + Duration::from_secs(config.duration_secs);
    let config = Arc::new(config);

    info!(
        concurrency = config.concurrency,
        duration_secs = config.duration_secs,
        stream_pct = config.stream_pct,
        "simulation started"
    );

    let mut handles = Vec::with_capacity(config.concurrency as usize);

    for worker_id in 0..config.concurrency {
        let running = running.clone();
        let metrics = metrics.clone();
        let config = config.clone();

        handles.push(tokio::spawn(async move {
            worker(worker_id, running, metrics, config, deadline).await;
        }));
    }

    for h in handles {
        if let Err(e) = h.await {
            warn!(error = %e, "simulated worker aborted");
        }
    }

    // Mark the run as finished
    running.store(false, Ordering::SeqCst);
    info!("simulation finished");
}

// ─── Worker loop ─────────────────────────────────────────────────

async fn worker(
    id: u32,
    running: Arc<AtomicBool>,
    metrics: Arc<MetricsCollector>,
    config: Arc<SimulationConfig>,
    deadline: Instant,
) {
    // Each worker gets its own deterministic RNG seeded uniquely.
    let mut rng = StdRng::seed_from_u64(1000 + id as u64);
    let mut issued = 0u64;

    while running.load(Ordering::Relaxed) && Instant::now() < deadline {
        if config.requests_per_user.is_some_and(|limit| issued >= limit) {
            break;
        }
        issued += 1;

        if rng.gen_range(0u8..100) < config.stream_pct {
            do_stream(&mut rng, &metrics, &config).await;
        } else {
            do_regular(&mut rng, &metrics, &config).await;
        }
    }
}

/// Sleep for a simulated latency scaled by `time_scale`. A zero scale
/// still yields so tight loops stay cooperative.
async fn pause(secs: f64, time_scale: f64) {
    let scaled = secs * time_scale;
    if scaled > 0.0 {
        tokio::time::sleep(Duration::from_secs_f64(scaled)).await;
    } else {
        tokio::task::yield_now().await;
    }
}

fn log_rejected(result: Result<String, RecordError>) {
    if let Err(e) = result {
        warn!(error = %e, "collector rejected a simulated record");
    }
}

fn pick<'a, T>(rng: &mut StdRng, items: &'a [T]) -> &'a T {
    &items[rng.gen_range(0..items.len())]
}

// ─── Streaming call ──────────────────────────────────────────────

async fn do_stream(rng: &mut StdRng, metrics: &MetricsCollector, config: &SimulationConfig) {
    let endpoint = *pick(rng, STREAM_ENDPOINTS);
    let request_id = Uuid::new_v4().to_string();

    let ttft = rng.gen_range(0.1..0.5);
    pause(ttft, config.time_scale).await;

    if !rng.gen_bool(config.stream_success_rate) && rng.gen_bool(0.5) {
        // Connection-level failure before any content arrived
        let error_type = *pick(rng, STREAM_ERROR_TYPES);
        metrics.record_error(
            error_type,
            format!("simulated error: {error_type}"),
            endpoint,
        );
        return;
    }

    // Headers are in; the outcome is only known once the stream ends
    log_rejected(metrics.record_request(RequestOutcome {
        endpoint: endpoint.into(),
        method: "POST".into(),
        status_code: 200,
        ttft: Some(Duration::from_secs_f64(ttft)),
        ttct: Duration::from_secs_f64(ttft),
        content_length: 0,
        is_stream: true,
        request_id: Some(request_id.clone()),
    }));

    let token_count = rng.gen_range(50..=500u64);
    let tokens_per_second = rng.gen_range(15.0..30.0);
    let ttct = (token_count as f64 / tokens_per_second * rng.gen_range(0.9..1.1)).max(ttft);
    pause(ttct - ttft, config.time_scale).await;

    let status_code = if rng.gen_bool(config.stream_success_rate) {
        200
    } else {
        *pick(rng, STREAM_FAILURE_CODES)
    };

    let completion = StreamCompletion {
        endpoint: endpoint.into(),
        status_code,
        ttft: Duration::from_secs_f64(ttft),
        ttct: Duration::from_secs_f64(ttct),
        token_count,
        request_id: Some(request_id),
    };

    // At-least-once delivery: sometimes the end-of-stream signal repeats
    let duplicate = rng.gen_range(0u8..100) < config.duplicate_completion_pct;
    log_rejected(metrics.record_stream_completion(completion.clone()));
    if duplicate {
        log_rejected(metrics.record_stream_completion(completion));
    }
}

// ─── Regular call ────────────────────────────────────────────────

async fn do_regular(rng: &mut StdRng, metrics: &MetricsCollector, config: &SimulationConfig) {
    let endpoint = *pick(rng, REGULAR_ENDPOINTS);
    let latency = rng.gen_range(0.05..0.3);
    pause(latency, config.time_scale).await;

    if rng.gen_bool(config.regular_success_rate) {
        log_rejected(metrics.record_request(RequestOutcome {
            endpoint: endpoint.into(),
            method: "GET".into(),
            status_code: 200,
            ttft: None,
            ttct: Duration::from_secs_f64(latency),
            content_length: rng.gen_range(500..=10_000),
            is_stream: false,
            request_id: Some(Uuid::new_v4().to_string()),
        }));
    } else if rng.gen_bool(0.7) {
        log_rejected(metrics.record_request(RequestOutcome {
            endpoint: endpoint.into(),
            method: "GET".into(),
            status_code: *pick(rng, REGULAR_FAILURE_CODES),
            ttft: None,
            ttct: Duration::from_secs_f64(latency),
            content_length: rng.gen_range(50..=500),
            is_stream: false,
            request_id: Some(Uuid::new_v4().to_string()),
        }));
    } else {
        let error_type = *pick(rng, REGULAR_ERROR_TYPES);
        metrics.record_error(
            error_type,
            format!("simulated error: {error_type}"),
            endpoint,
        );
    }
}
