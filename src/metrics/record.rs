use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::RecordError;

// ─── Write-side inputs ───────────────────────────────────────────

/// Outcome of one request, as reported by a worker after the call
/// returned (or after the response headers arrived, for streams).
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    /// e.g. "/api/v1/generate_content"
    pub endpoint: String,
    /// e.g. "POST"
    pub method: String,
    pub status_code: u16,
    /// Time to first content chunk, if the worker observed one
    pub ttft: Option<Duration>,
    /// Time to full completion
    pub ttct: Duration,
    /// Bytes for regular calls, tokens for streaming calls
    pub content_length: u64,
    pub is_stream: bool,
    /// Correlation key. When absent a synthetic one is derived from the
    /// endpoint and timestamp, which can collide under high call rates.
    pub request_id: Option<String>,
}

/// Final report for one streaming call.
#[derive(Debug, Clone)]
pub struct StreamCompletion {
    pub endpoint: String,
    pub status_code: u16,
    pub ttft: Duration,
    pub ttct: Duration,
    pub token_count: u64,
    /// Reuse the id passed to `record_request` so retried reports of the
    /// same stream collapse into one counted outcome.
    pub request_id: Option<String>,
}

/// Any status code is accepted; codes outside 2xx (0 for "no response"
/// included) are classified as failures by [`is_success`].
fn validate(endpoint: &str) -> Result<(), RecordError> {
    if endpoint.trim().is_empty() {
        return Err(RecordError::EmptyEndpoint);
    }
    Ok(())
}

pub(crate) fn synthetic_request_id(endpoint: &str, timestamp: DateTime<Utc>) -> String {
    format!("{}-{}", endpoint, timestamp.timestamp_micros())
}

pub fn is_success(status_code: u16) -> bool {
    (200..300).contains(&status_code)
}

// ─── Stored records ──────────────────────────────────────────────

/// One row of the full request history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    /// Seconds
    pub ttft: Option<f64>,
    /// Seconds
    pub ttct: f64,
    pub content_length: u64,
    pub is_stream: bool,
    pub request_id: String,
}

impl EventRecord {
    pub(crate) fn from_outcome(
        outcome: RequestOutcome,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, RecordError> {
        validate(&outcome.endpoint)?;
        let request_id = outcome
            .request_id
            .unwrap_or_else(|| synthetic_request_id(&outcome.endpoint, timestamp));

        Ok(Self {
            timestamp,
            endpoint: outcome.endpoint,
            method: outcome.method,
            status_code: outcome.status_code,
            ttft: outcome.ttft.map(|d| d.as_secs_f64()),
            ttct: outcome.ttct.as_secs_f64(),
            content_length: outcome.content_length,
            is_stream: outcome.is_stream,
            request_id,
        })
    }

    pub fn is_success(&self) -> bool {
        is_success(self.status_code)
    }
}

/// One row of the stream-completion history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamRecord {
    pub timestamp: DateTime<Utc>,
    pub endpoint: String,
    pub status_code: u16,
    pub ttft: f64,
    pub ttct: f64,
    pub token_count: u64,
    pub tokens_per_second: f64,
    pub request_id: String,
}

impl StreamRecord {
    pub(crate) fn from_completion(
        completion: StreamCompletion,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, RecordError> {
        validate(&completion.endpoint)?;
        let request_id = completion
            .request_id
            .unwrap_or_else(|| synthetic_request_id(&completion.endpoint, timestamp));

        let ttct = completion.ttct.as_secs_f64();
        let tokens_per_second = if ttct > 0.0 {
            completion.token_count as f64 / ttct
        } else {
            0.0
        };

        Ok(Self {
            timestamp,
            endpoint: completion.endpoint,
            status_code: completion.status_code,
            ttft: completion.ttft.as_secs_f64(),
            ttct,
            token_count: completion.token_count,
            tokens_per_second,
            request_id,
        })
    }

    pub fn is_success(&self) -> bool {
        is_success(self.status_code)
    }
}

/// A caller-classified failure. The error type is the multimap key and
/// is not repeated in the stored entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub endpoint: String,
}

// ─── Error taxonomy ──────────────────────────────────────────────

/// Caller-side failure classes. Anything outside the three built-in
/// classes is carried verbatim as `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Timeout,
    Network,
    General,
    Other(String),
}

impl ErrorKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::General => "general",
            Self::Other(tag) => tag,
        }
    }
}

impl From<&str> for ErrorKind {
    fn from(tag: &str) -> Self {
        match tag {
            "timeout" => Self::Timeout,
            "network" => Self::Network,
            "general" => Self::General,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl From<String> for ErrorKind {
    fn from(tag: String) -> Self {
        Self::from(tag.as_str())
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
