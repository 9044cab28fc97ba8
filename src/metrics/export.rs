//! Result-directory export.
//!
//! Produces four plain files per run:
//!
//! ```text
//! {results_dir}/{test_name}_{users}users_{YYYYmmdd_HHMMSS}/
//!     requests.csv         every recorded request, streaming and regular
//!     stream_metrics.csv   every stream completion report
//!     errors.json          {error_type: [{timestamp, message, endpoint}]}
//!     summary.json         the SessionResult
//! ```
//!
//! The collector is locked once to copy its state; aggregation and all
//! file I/O run after the lock is released.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::info;

use super::aggregator::Aggregator;
use super::collector::{ExportSnapshot, MetricsCollector};
use super::record::{EventRecord, StreamRecord};
use super::session::SessionResult;
use crate::config::ExportConfig;
use crate::error::ExportError;

pub const REQUESTS_FILE: &str = "requests.csv";
pub const STREAM_METRICS_FILE: &str = "stream_metrics.csv";
pub const ERRORS_FILE: &str = "errors.json";
pub const SUMMARY_FILE: &str = "summary.json";

const REQUEST_HEADER: &[&str] = &[
    "timestamp",
    "endpoint",
    "method",
    "status_code",
    "ttft",
    "ttct",
    "content_length",
    "is_stream",
    "request_id",
];

const STREAM_HEADER: &[&str] = &[
    "timestamp",
    "endpoint",
    "status_code",
    "ttft",
    "ttct",
    "token_count",
    "tokens_per_second",
    "request_id",
];

/// Writes collector state into timestamped result directories.
#[derive(Debug, Clone)]
pub struct ResultExporter {
    results_dir: PathBuf,
}

/// Where an export landed and the summary that was written.
#[derive(Debug, Clone, Serialize)]
pub struct ExportOutcome {
    pub directory: PathBuf,
    pub summary: SessionResult,
}

impl ResultExporter {
    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_dir: results_dir.into(),
        }
    }

    pub fn from_config(config: &ExportConfig) -> Self {
        Self::new(&config.results_dir)
    }

    pub fn export(
        &self,
        metrics: &MetricsCollector,
        test_name: &str,
        concurrent_users: u32,
    ) -> Result<ExportOutcome, ExportError> {
        let snapshot = metrics.export_snapshot();
        self.write_snapshot(snapshot, test_name, concurrent_users)
    }

    /// Serialize an already copied snapshot.
    pub fn write_snapshot(
        &self,
        snapshot: ExportSnapshot,
        test_name: &str,
        concurrent_users: u32,
    ) -> Result<ExportOutcome, ExportError> {
        let ExportSnapshot {
            view,
            requests,
            stream_metrics,
            errors,
        } = snapshot;
        let summary = Aggregator::new(view).session_result(concurrent_users);

        let directory = self.create_run_dir(test_name, concurrent_users)?;

        write_file(&directory.join(REQUESTS_FILE), |w| {
            write_requests_csv(w, &requests)
        })?;
        write_file(&directory.join(STREAM_METRICS_FILE), |w| {
            write_stream_csv(w, &stream_metrics)
        })?;
        write_json(&directory.join(ERRORS_FILE), &errors)?;
        write_json(&directory.join(SUMMARY_FILE), &summary)?;

        info!(
            directory = %directory.display(),
            requests = requests.len(),
            stream_completions = stream_metrics.len(),
            error_types = errors.len(),
            "test results exported"
        );

        Ok(ExportOutcome { directory, summary })
    }

    /// `{test_name}_{users}users_{timestamp}`, with `_N` appended when an
    /// export in the same second already claimed the name.
    fn create_run_dir(
        &self,
        test_name: &str,
        concurrent_users: u32,
    ) -> Result<PathBuf, ExportError> {
        fs::create_dir_all(&self.results_dir)
            .map_err(|e| ExportError::io(&self.results_dir, e))?;

        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let base = format!("{test_name}_{concurrent_users}users_{stamp}");

        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                base.clone()
            } else {
                format!("{base}_{attempt}")
            };
            let dir = self.results_dir.join(name);
            match fs::create_dir(&dir) {
                Ok(()) => return Ok(dir),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(ExportError::io(dir, e)),
            }
        }
    }
}

fn write_file<F>(path: &Path, body: F) -> Result<(), ExportError>
where
    F: FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
{
    let file = File::create(path).map_err(|e| ExportError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    body(&mut writer)
        .and_then(|()| writer.flush())
        .map_err(|e| ExportError::io(path, e))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ExportError> {
    let file = File::create(path).map_err(|e| ExportError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writeln!(writer).map_err(|e| ExportError::io(path, e))?;
    writer.flush().map_err(|e| ExportError::io(path, e))
}

// ─── CSV ─────────────────────────────────────────────────────────

pub fn write_requests_csv<W: Write>(writer: &mut W, rows: &[EventRecord]) -> std::io::Result<()> {
    write_row(writer, REQUEST_HEADER.iter().copied())?;
    for r in rows {
        let ttft = r.ttft.map(|v| v.to_string()).unwrap_or_default();
        write_row(
            writer,
            [
                r.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true).as_str(),
                r.endpoint.as_str(),
                r.method.as_str(),
                r.status_code.to_string().as_str(),
                ttft.as_str(),
                r.ttct.to_string().as_str(),
                r.content_length.to_string().as_str(),
                if r.is_stream { "true" } else { "false" },
                r.request_id.as_str(),
            ],
        )?;
    }
    Ok(())
}

pub fn write_stream_csv<W: Write>(writer: &mut W, rows: &[StreamRecord]) -> std::io::Result<()> {
    write_row(writer, STREAM_HEADER.iter().copied())?;
    for r in rows {
        write_row(
            writer,
            [
                r.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true).as_str(),
                r.endpoint.as_str(),
                r.status_code.to_string().as_str(),
                r.ttft.to_string().as_str(),
                r.ttct.to_string().as_str(),
                r.token_count.to_string().as_str(),
                r.tokens_per_second.to_string().as_str(),
                r.request_id.as_str(),
            ],
        )?;
    }
    Ok(())
}

fn write_row<'a, W, I>(writer: &mut W, fields: I) -> std::io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a str>,
{
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            writer.write_all(b",")?;
        }
        write_field(writer, field)?;
    }
    writer.write_all(b"\n")
}

/// RFC 4180 quoting: fields with separators, quotes or line breaks are
/// wrapped in quotes and inner quotes doubled.
fn write_field<W: Write>(writer: &mut W, field: &str) -> std::io::Result<()> {
    if field.contains(&[',', '"', '\n', '\r'][..]) {
        write!(writer, "\"{}\"", field.replace('"', "\"\""))
    } else {
        writer.write_all(field.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::metrics::record::RequestOutcome;

    #[test]
    fn quotes_fields_that_need_it() {
        let mut out = Vec::new();
        write_row(&mut out, ["plain", "a,b", "say \"hi\""]).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "plain,\"a,b\",\"say \"\"hi\"\"\"\n"
        );
    }

    #[test]
    fn empty_table_keeps_header() {
        let mut out = Vec::new();
        write_stream_csv(&mut out, &[]).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "timestamp,endpoint,status_code,ttft,ttct,token_count,tokens_per_second,request_id\n"
        );
    }

    #[test]
    fn absent_ttft_is_blank() {
        let metrics = MetricsCollector::new();
        metrics
            .record_request(RequestOutcome {
                endpoint: "/api/v1/books".into(),
                method: "GET".into(),
                status_code: 200,
                ttft: None,
                ttct: Duration::from_millis(500),
                content_length: 42,
                is_stream: false,
                request_id: Some("req-1".into()),
            })
            .unwrap();

        let mut out = Vec::new();
        write_requests_csv(&mut out, &metrics.export_snapshot().requests).unwrap();
        let text = String::from_utf8(out).unwrap();
        let row = text.lines().nth(1).unwrap();
        assert!(row.ends_with(",/api/v1/books,GET,200,,0.5,42,false,req-1"), "{row}");
    }
}
