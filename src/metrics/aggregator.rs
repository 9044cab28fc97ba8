use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::collector::CollectorView;
use super::percentiles::{LatencyPercentiles, LatencyStats, PercentileSet};
use super::session::SessionResult;

/// Read-only statistics over a [`CollectorView`].
///
/// Construction does not touch the collector lock; the view was already
/// copied out, so sorting and averaging here never block writers.
#[derive(Debug, Clone)]
pub struct Aggregator {
    view: CollectorView,
}

impl Aggregator {
    pub fn new(view: CollectorView) -> Self {
        Self { view }
    }

    pub fn view(&self) -> &CollectorView {
        &self.view
    }

    /// successes / (successes + failures), 0.0 before any outcome.
    pub fn success_rate(&self) -> f64 {
        let total = self.view.success_count + self.view.failure_count;
        if total == 0 {
            return 0.0;
        }
        self.view.success_count as f64 / total as f64
    }

    pub fn current_throughput_per_second(&self) -> f64 {
        self.throughput_at(Utc::now())
    }

    /// Requests in the trailing window ending at `now`, divided by the
    /// span from the oldest of them to `now`.
    pub fn throughput_at(&self, now: DateTime<Utc>) -> f64 {
        let window = self.view.throughput_window.as_secs_f64();
        let in_window: Vec<f64> = self
            .view
            .recent_requests
            .iter()
            .map(|r| secs_between(r.timestamp, now))
            .filter(|age| *age <= window)
            .collect();

        if in_window.len() < 2 {
            return 0.0;
        }

        let span = in_window.iter().copied().fold(f64::MIN, f64::max);
        if span <= 0.0 {
            return 0.0;
        }
        in_window.len() as f64 / span
    }

    pub fn latency_percentiles(&self) -> LatencyPercentiles {
        LatencyPercentiles {
            ttft: LatencyStats::from_samples(&self.view.recent_ttfts),
            ttct: LatencyStats::from_samples(&self.view.recent_ttcts),
        }
    }

    pub fn error_summary(&self) -> BTreeMap<String, u64> {
        self.view.error_counts.clone()
    }

    /// Tokens per second over the recent TTCT window: total tokens divided
    /// by the summed recent completion times.
    pub fn avg_tokens_per_second(&self) -> f64 {
        let total_ttct: f64 = self.view.recent_ttcts.iter().sum();
        if total_ttct > 0.0 {
            self.view.total_tokens as f64 / total_ttct
        } else {
            0.0
        }
    }

    pub fn session_result(&self, concurrent_users: u32) -> SessionResult {
        let LatencyPercentiles { ttft, ttct } = self.latency_percentiles();
        let view = &self.view;

        SessionResult {
            timestamp: Utc::now(),
            concurrent_users,
            success_count: view.success_count,
            failure_count: view.failure_count,
            total_requests: view.total_requests,
            timeout_count: view.timeout_count,
            avg_ttft: ttft.map(|s| s.mean),
            avg_ttct: ttct.map(|s| s.mean),
            p50_ttft: ttft.map(|s| s.median),
            p90_ttft: ttft.map(|s| s.p90),
            p95_ttft: ttft.map(|s| s.p95),
            p50_ttct: ttct.map(|s| s.median),
            p90_ttct: ttct.map(|s| s.p90),
            p95_ttct: ttct.map(|s| s.p95),
            total_tokens: view.total_tokens,
            avg_tokens_per_second: self.avg_tokens_per_second(),
            error_types: self.error_summary(),

            success_rate: self.success_rate(),
            requests_per_second: self.current_throughput_per_second(),
            session_start: view.session_start,
            elapsed_secs: view.elapsed.as_secs_f64(),
            stream: view.stream.clone(),
            non_stream: view.non_stream.clone(),
            endpoints: view.endpoints.clone(),
            session_ttft: PercentileSet::from_histogram(&view.ttft_hist),
            session_ttct: PercentileSet::from_histogram(&view.ttct_hist),
        }
    }
}

fn secs_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let delta = later - earlier;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_milliseconds() as f64 / 1_000.0,
    }
}
