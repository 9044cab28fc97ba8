use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::percentiles::PercentileSet;

/// Counters for one call category (streaming or regular).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CategoryBreakdown {
    /// `record_request` calls in this category
    pub requests: u64,
    /// Stream completion reports, duplicates included (always 0 for regular calls)
    pub completions: u64,
    /// Completion reports whose request id had already been counted
    pub duplicate_completions: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Bytes for regular calls, tokens for streaming calls
    pub content_total: u64,
}

/// Counters for one endpoint key.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EndpointBreakdown {
    /// Set once any streaming call was seen on this endpoint
    pub is_stream: bool,
    pub requests: u64,
    pub completions: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub error_count: u64,
    /// Mean TTCT in seconds over regular calls and stream completions.
    /// Stream header reports are left out.
    pub avg_ttct: Option<f64>,
    #[serde(skip)]
    pub(crate) ttct_sum: f64,
    #[serde(skip)]
    pub(crate) ttct_samples: u64,
}

impl EndpointBreakdown {
    pub(crate) fn add_ttct(&mut self, secs: f64) {
        self.ttct_sum += secs;
        self.ttct_samples += 1;
        self.avg_ttct = Some(self.ttct_sum / self.ttct_samples as f64);
    }
}

/// Canonical summary document of one test session.
///
/// The leading fields up to `error_types` are the stable interchange
/// contract read by downstream report tooling.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionResult {
    pub timestamp: DateTime<Utc>,
    pub concurrent_users: u32,
    pub success_count: u64,
    pub failure_count: u64,
    pub total_requests: u64,
    pub timeout_count: u64,
    pub avg_ttft: Option<f64>,
    pub avg_ttct: Option<f64>,
    pub p50_ttft: Option<f64>,
    pub p90_ttft: Option<f64>,
    pub p95_ttft: Option<f64>,
    pub p50_ttct: Option<f64>,
    pub p90_ttct: Option<f64>,
    pub p95_ttct: Option<f64>,
    pub total_tokens: u64,
    pub avg_tokens_per_second: f64,
    pub error_types: BTreeMap<String, u64>,

    pub success_rate: f64,
    pub requests_per_second: f64,
    pub session_start: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub stream: CategoryBreakdown,
    pub non_stream: CategoryBreakdown,
    pub endpoints: BTreeMap<String, EndpointBreakdown>,
    pub session_ttft: PercentileSet,
    pub session_ttct: PercentileSet,
}
