use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use tracing::{debug, info, trace};

use super::aggregator::Aggregator;
use super::percentiles::{new_histogram, record_secs};
use super::record::{
    ErrorKind, ErrorRecord, EventRecord, RequestOutcome, StreamCompletion, StreamRecord,
};
use super::session::{CategoryBreakdown, EndpointBreakdown, SessionResult};
use super::window::RecentWindow;
use crate::config::CollectorConfig;
use crate::error::RecordError;

// ─── Public types ────────────────────────────────────────────────

/// Thread-safe metrics engine.
///
/// Workers call the `record_*` operations, the reporting side calls
/// `snapshot()` / `export_snapshot()`. Every state transition happens
/// under one mutex, so a reader never sees a half-applied update
/// (e.g. a history append without its counter increment).
pub struct MetricsCollector {
    inner: Mutex<Inner>,
    config: CollectorConfig,
}

/// Bounded copy of the collector state, taken in one lock acquisition.
/// All statistics are derived from this outside the lock.
#[derive(Debug, Clone)]
pub struct CollectorView {
    pub success_count: u64,
    pub failure_count: u64,
    pub timeout_count: u64,
    pub total_requests: u64,
    pub total_tokens: u64,
    pub stream: CategoryBreakdown,
    pub non_stream: CategoryBreakdown,
    pub endpoints: BTreeMap<String, EndpointBreakdown>,
    pub error_counts: BTreeMap<String, u64>,
    /// Oldest first
    pub recent_requests: Vec<EventRecord>,
    pub recent_ttfts: Vec<f64>,
    pub recent_ttcts: Vec<f64>,
    pub ttft_hist: Histogram<u64>,
    pub ttct_hist: Histogram<u64>,
    pub session_start: DateTime<Utc>,
    pub elapsed: Duration,
    pub throughput_window: Duration,
}

/// Full history plus a view, copied in the same critical section so the
/// exported tables and the summary agree with each other.
#[derive(Debug, Clone)]
pub struct ExportSnapshot {
    pub view: CollectorView,
    pub requests: Vec<EventRecord>,
    pub stream_metrics: Vec<StreamRecord>,
    pub errors: BTreeMap<String, Vec<ErrorRecord>>,
}

// ─── Internal state ──────────────────────────────────────────────

struct Inner {
    // Append-only history (export)
    requests: Vec<EventRecord>,
    stream_metrics: Vec<StreamRecord>,
    errors: BTreeMap<String, Vec<ErrorRecord>>,

    // Bounded live windows
    recent_requests: RecentWindow<EventRecord>,
    recent_ttfts: RecentWindow<f64>,
    recent_ttcts: RecentWindow<f64>,

    // Whole-session latency distribution (μs)
    ttft_hist: Histogram<u64>,
    ttct_hist: Histogram<u64>,

    // Counters
    success_count: u64,
    failure_count: u64,
    timeout_count: u64,
    total_requests: u64,
    total_tokens: u64,

    // Partitions
    stream: CategoryBreakdown,
    non_stream: CategoryBreakdown,
    endpoints: BTreeMap<String, EndpointBreakdown>,

    // Stream request ids whose outcome has been tallied
    counted_stream_ids: HashSet<String>,

    session_start: DateTime<Utc>,
    started_at: Instant,
}

// ─── MetricsCollector impl ───────────────────────────────────────

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_config(CollectorConfig::default())
    }

    pub fn with_config(config: CollectorConfig) -> Self {
        Self {
            inner: Mutex::new(Inner::new(&config)),
            config,
        }
    }

    /// Record one completed (or failed) call and return the request id
    /// it was stored under.
    ///
    /// Streaming calls are not tallied as success or failure here; that
    /// happens once in [`record_stream_completion`](Self::record_stream_completion).
    pub fn record_request(&self, outcome: RequestOutcome) -> Result<String, RecordError> {
        let synthetic = outcome.request_id.is_none();
        let record = EventRecord::from_outcome(outcome, Utc::now())?;
        if synthetic {
            debug!(
                endpoint = %record.endpoint,
                request_id = %record.request_id,
                "no request id supplied, using synthetic id"
            );
        }

        let id = record.request_id.clone();
        self.inner.lock().record_request(record);
        Ok(id)
    }

    /// Record the end of a streaming call. The success/failure outcome of
    /// a given request id is counted exactly once; repeated reports only
    /// add to token and latency aggregates.
    pub fn record_stream_completion(
        &self,
        completion: StreamCompletion,
    ) -> Result<String, RecordError> {
        let record = StreamRecord::from_completion(completion, Utc::now())?;
        let id = record.request_id.clone();
        let first = self.inner.lock().record_stream_completion(record);
        if first {
            debug!(request_id = %id, "stream completion counted");
        } else {
            trace!(request_id = %id, "duplicate stream completion");
        }
        Ok(id)
    }

    /// Record a caller-classified failure. Always counts as a failure;
    /// `timeout` errors also bump the timeout counter.
    pub fn record_error(
        &self,
        error_type: impl Into<ErrorKind>,
        message: impl Into<String>,
        endpoint: impl Into<String>,
    ) {
        let kind = error_type.into();
        let record = ErrorRecord {
            timestamp: Utc::now(),
            message: message.into(),
            endpoint: endpoint.into(),
        };
        self.inner.lock().record_error(kind, record);
    }

    /// Wipe all data and restart the session clock.
    pub fn reset(&self) {
        *self.inner.lock() = Inner::new(&self.config);
        info!("metrics collector reset");
    }

    pub fn snapshot(&self) -> CollectorView {
        self.inner.lock().view(&self.config)
    }

    pub fn export_snapshot(&self) -> ExportSnapshot {
        let inner = self.inner.lock();
        ExportSnapshot {
            view: inner.view(&self.config),
            requests: inner.requests.clone(),
            stream_metrics: inner.stream_metrics.clone(),
            errors: inner.errors.clone(),
        }
    }

    pub fn aggregator(&self) -> Aggregator {
        Aggregator::new(self.snapshot())
    }

    pub fn session_result(&self, concurrent_users: u32) -> SessionResult {
        self.aggregator().session_result(concurrent_users)
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Inner impl ──────────────────────────────────────────────────

impl Inner {
    fn new(config: &CollectorConfig) -> Self {
        Self {
            requests: Vec::new(),
            stream_metrics: Vec::new(),
            errors: BTreeMap::new(),
            recent_requests: RecentWindow::new(config.recent_requests_capacity),
            recent_ttfts: RecentWindow::new(config.latency_window_capacity),
            recent_ttcts: RecentWindow::new(config.latency_window_capacity),
            ttft_hist: new_histogram(),
            ttct_hist: new_histogram(),
            success_count: 0,
            failure_count: 0,
            timeout_count: 0,
            total_requests: 0,
            total_tokens: 0,
            stream: CategoryBreakdown::default(),
            non_stream: CategoryBreakdown::default(),
            endpoints: BTreeMap::new(),
            counted_stream_ids: HashSet::new(),
            session_start: Utc::now(),
            started_at: Instant::now(),
        }
    }

    fn push_latencies(&mut self, ttft: Option<f64>, ttct: f64) {
        if let Some(ttft) = ttft {
            self.recent_ttfts.push(ttft);
            record_secs(&mut self.ttft_hist, ttft);
        }
        self.recent_ttcts.push(ttct);
        record_secs(&mut self.ttct_hist, ttct);
    }

    fn record_request(&mut self, record: EventRecord) {
        self.total_requests += 1;
        self.push_latencies(record.ttft, record.ttct);

        let success = record.is_success();
        let endpoint = self.endpoints.entry(record.endpoint.clone()).or_default();
        endpoint.is_stream |= record.is_stream;
        endpoint.requests += 1;

        if record.is_stream {
            // Outcome, tokens and TTCT are only known once the stream finishes
            self.stream.requests += 1;
        } else {
            endpoint.add_ttct(record.ttct);
            self.non_stream.requests += 1;
            self.non_stream.content_total += record.content_length;
            if success {
                self.success_count += 1;
                self.non_stream.success_count += 1;
                endpoint.success_count += 1;
            } else {
                self.failure_count += 1;
                self.non_stream.failure_count += 1;
                endpoint.failure_count += 1;
            }
        }

        self.recent_requests.push(record.clone());
        self.requests.push(record);
    }

    /// Returns true when this was the first report for the request id.
    fn record_stream_completion(&mut self, record: StreamRecord) -> bool {
        self.push_latencies(Some(record.ttft), record.ttct);
        self.total_tokens += record.token_count;
        self.stream.completions += 1;
        self.stream.content_total += record.token_count;

        let endpoint = self.endpoints.entry(record.endpoint.clone()).or_default();
        endpoint.is_stream = true;
        endpoint.completions += 1;
        endpoint.add_ttct(record.ttct);

        let first = self.counted_stream_ids.insert(record.request_id.clone());
        if first {
            if record.is_success() {
                self.success_count += 1;
                self.stream.success_count += 1;
                endpoint.success_count += 1;
            } else {
                self.failure_count += 1;
                self.stream.failure_count += 1;
                endpoint.failure_count += 1;
            }
        } else {
            self.stream.duplicate_completions += 1;
        }

        self.stream_metrics.push(record);
        first
    }

    fn record_error(&mut self, kind: ErrorKind, record: ErrorRecord) {
        if kind == ErrorKind::Timeout {
            self.timeout_count += 1;
        }
        self.failure_count += 1;
        self.endpoints
            .entry(record.endpoint.clone())
            .or_default()
            .error_count += 1;
        self.errors
            .entry(kind.as_str().to_owned())
            .or_default()
            .push(record);
    }

    fn view(&self, config: &CollectorConfig) -> CollectorView {
        CollectorView {
            success_count: self.success_count,
            failure_count: self.failure_count,
            timeout_count: self.timeout_count,
            total_requests: self.total_requests,
            total_tokens: self.total_tokens,
            stream: self.stream.clone(),
            non_stream: self.non_stream.clone(),
            endpoints: self.endpoints.clone(),
            error_counts: self
                .errors
                .iter()
                .map(|(kind, records)| (kind.clone(), records.len() as u64))
                .collect(),
            recent_requests: self.recent_requests.to_vec(),
            recent_ttfts: self.recent_ttfts.to_vec(),
            recent_ttcts: self.recent_ttcts.to_vec(),
            ttft_hist: self.ttft_hist.clone(),
            ttct_hist: self.ttct_hist.clone(),
            session_start: self.session_start,
            elapsed: self.started_at.elapsed(),
            throughput_window: config.throughput_window(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(endpoint: &str, status_code: u16, id: &str) -> RequestOutcome {
        RequestOutcome {
            endpoint: endpoint.into(),
            method: "GET".into(),
            status_code,
            ttft: None,
            ttct: Duration::from_millis(100),
            content_length: 512,
            is_stream: false,
            request_id: Some(id.into()),
        }
    }

    fn completion(id: &str, status_code: u16) -> StreamCompletion {
        StreamCompletion {
            endpoint: "/api/v1/generate_content".into(),
            status_code,
            ttft: Duration::from_millis(200),
            ttct: Duration::from_secs(1),
            token_count: 50,
            request_id: Some(id.into()),
        }
    }

    #[test]
    fn regular_requests_are_tallied_immediately() {
        let metrics = MetricsCollector::new();
        metrics.record_request(request("/books", 200, "a")).unwrap();
        metrics.record_request(request("/books", 200, "b")).unwrap();
        metrics.record_request(request("/books", 500, "c")).unwrap();

        let view = metrics.snapshot();
        assert_eq!(view.success_count, 2);
        assert_eq!(view.failure_count, 1);
        assert_eq!(view.total_requests, 3);
        assert_eq!(view.non_stream.requests, 3);
        assert_eq!(view.non_stream.content_total, 1536);
        assert_eq!(view.endpoints["/books"].failure_count, 1);
    }

    #[test]
    fn stream_request_defers_tally_until_completion() {
        let metrics = MetricsCollector::new();
        let mut header = request("/gen", 200, "s1");
        header.is_stream = true;
        header.ttft = Some(Duration::from_millis(150));
        metrics.record_request(header).unwrap();

        let view = metrics.snapshot();
        assert_eq!(view.total_requests, 1);
        assert_eq!(view.success_count + view.failure_count, 0);
        assert_eq!(view.stream.requests, 1);

        metrics.record_stream_completion(completion("s1", 200)).unwrap();
        let view = metrics.snapshot();
        assert_eq!(view.success_count, 1);
        assert_eq!(view.total_requests, 1);
    }

    #[test]
    fn duplicate_completion_counts_once() {
        let metrics = MetricsCollector::new();
        metrics.record_stream_completion(completion("r1", 200)).unwrap();
        metrics.record_stream_completion(completion("r1", 200)).unwrap();

        let view = metrics.snapshot();
        assert_eq!(view.success_count, 1);
        assert_eq!(view.total_requests, 0);
        assert_eq!(view.total_tokens, 100);
        assert_eq!(view.stream.completions, 2);
        assert_eq!(view.stream.duplicate_completions, 1);
        assert_eq!(view.recent_ttcts.len(), 2);
    }

    #[test]
    fn failed_completion_then_retry_report_keeps_first_outcome() {
        let metrics = MetricsCollector::new();
        metrics.record_stream_completion(completion("r2", 503)).unwrap();
        metrics.record_stream_completion(completion("r2", 200)).unwrap();

        let view = metrics.snapshot();
        assert_eq!(view.failure_count, 1);
        assert_eq!(view.success_count, 0);
    }

    #[test]
    fn errors_count_as_failures() {
        let metrics = MetricsCollector::new();
        metrics.record_error("timeout", "msg", "/x");
        metrics.record_error(ErrorKind::Timeout, "msg2", "/x");
        metrics.record_error("network", "reset by peer", "/y");

        let view = metrics.snapshot();
        assert_eq!(view.failure_count, 3);
        assert_eq!(view.timeout_count, 2);
        assert_eq!(view.error_counts["timeout"], 2);
        assert_eq!(view.error_counts["network"], 1);
        assert_eq!(view.endpoints["/x"].error_count, 2);
    }

    #[test]
    fn invalid_input_leaves_state_untouched() {
        let metrics = MetricsCollector::new();
        assert_eq!(
            metrics.record_request(request("", 200, "a")),
            Err(RecordError::EmptyEndpoint)
        );
        let mut blank = completion("b", 200);
        blank.endpoint = String::new();
        assert!(metrics.record_stream_completion(blank).is_err());

        let view = metrics.snapshot();
        assert_eq!(view.total_requests, 0);
        assert!(view.recent_ttcts.is_empty());
        assert!(metrics.export_snapshot().stream_metrics.is_empty());
    }

    #[test]
    fn unusual_status_codes_count_as_failures() {
        let metrics = MetricsCollector::new();
        metrics.record_request(request("/books", 0, "no-response")).unwrap();
        metrics.record_stream_completion(completion("s600", 600)).unwrap();

        let view = metrics.snapshot();
        assert_eq!(view.failure_count, 2);
        assert_eq!(view.success_count, 0);
        assert_eq!(view.total_requests, 1);
        assert_eq!(view.stream.failure_count, 1);
    }

    #[test]
    fn stream_tokens_are_counted_once_per_completion() {
        let metrics = MetricsCollector::new();
        let mut header = request("/api/v1/generate_content", 200, "t1");
        header.is_stream = true;
        header.content_length = 50;
        metrics.record_request(header).unwrap();
        metrics.record_stream_completion(completion("t1", 200)).unwrap();

        let view = metrics.snapshot();
        assert_eq!(view.total_tokens, 50);
        assert_eq!(view.stream.content_total, view.total_tokens);
    }

    #[test]
    fn endpoint_stream_flag_sticks_and_averages_completions() {
        let metrics = MetricsCollector::new();
        let mut header = request("/api/v1/generate_content", 200, "e1");
        header.is_stream = true;
        header.ttct = Duration::from_millis(200);
        metrics.record_request(header).unwrap();
        metrics.record_stream_completion(completion("e1", 200)).unwrap();
        // Same endpoint hit once without streaming
        let plain = request("/api/v1/generate_content", 200, "e2");
        metrics.record_request(plain).unwrap();

        let view = metrics.snapshot();
        let ep = &view.endpoints["/api/v1/generate_content"];
        assert!(ep.is_stream);
        assert_eq!(ep.requests, 2);
        // completion (1.0s) and the regular call (0.1s); the header phase is skipped
        let avg = ep.avg_ttct.unwrap();
        assert!((avg - 0.55).abs() < 1e-9, "{avg}");
    }

    #[test]
    fn missing_request_id_gets_synthetic_one() {
        let metrics = MetricsCollector::new();
        let mut outcome = request("/books", 200, "unused");
        outcome.request_id = None;
        let id = metrics.record_request(outcome).unwrap();
        assert!(id.starts_with("/books-"));
        assert_eq!(metrics.export_snapshot().requests[0].request_id, id);
    }

    #[test]
    fn windows_respect_configured_capacity() {
        let metrics = MetricsCollector::with_config(CollectorConfig {
            recent_requests_capacity: 3,
            latency_window_capacity: 2,
            ..CollectorConfig::default()
        });
        for i in 0..5 {
            metrics
                .record_request(request("/books", 200, &format!("id-{i}")))
                .unwrap();
        }

        let snap = metrics.export_snapshot();
        assert_eq!(snap.requests.len(), 5);
        assert_eq!(snap.view.recent_requests.len(), 3);
        assert_eq!(snap.view.recent_requests[0].request_id, "id-2");
        assert_eq!(snap.view.recent_ttcts.len(), 2);
        assert_eq!(snap.view.ttct_hist.len(), 5);
    }

    #[test]
    fn reset_clears_everything_including_seen_ids() {
        let metrics = MetricsCollector::new();
        metrics.record_stream_completion(completion("r1", 200)).unwrap();
        metrics.record_error("general", "boom", "/x");
        let before = metrics.snapshot().session_start;

        metrics.reset();
        let snap = metrics.export_snapshot();
        assert_eq!(snap.view.success_count, 0);
        assert_eq!(snap.view.failure_count, 0);
        assert!(snap.errors.is_empty());
        assert!(snap.stream_metrics.is_empty());
        assert!(snap.view.session_start >= before);

        // The same id counts again in the new session
        metrics.record_stream_completion(completion("r1", 200)).unwrap();
        assert_eq!(metrics.snapshot().success_count, 1);
    }
}
