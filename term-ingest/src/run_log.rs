//! Structured run log for pipeline steps.
//!
//! Callers supply `(step, status, message)`; the [`RunLogger`] adds the
//! domain, process, originating component, acting principal and timestamp,
//! then hands the [`LogEntry`] to every configured [`LogSink`].
//!
//! Logging is fire-and-forget. A sink that fails is reported through
//! `tracing` and otherwise ignored, so a broken log destination never stops
//! an ingestion run. Sinks are async; file sinks write through `tokio::fs`.
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use term_ingest::run_log::{LogFilter, LogStatus, MemorySink, RunLogger};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let sink = Arc::new(MemorySink::new());
//! let logger = RunLogger::new("member", "bronze_ingestion")
//!     .with_principal("etl-bot")
//!     .with_sink(sink.clone());
//!
//! logger
//!     .success("write_to_bronze", "Wrote 'customers' to dev.bronze.customers")
//!     .await;
//! logger.failure("archive_files", "Permission denied").await;
//!
//! let failures = sink.query(&LogFilter::new().status(LogStatus::Failure));
//! assert_eq!(failures.len(), 1);
//! assert_eq!(failures[0].principal, "etl-bot");
//! # }
//! ```

use crate::logging::truncate_field;
use crate::prelude::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;

/// Status of a logged step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Warning,
    Failure,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Failure => "failure",
        }
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One append-only run-log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    /// Acting principal (user or service identity)
    pub principal: String,
    /// Component that emitted the entry
    pub source: String,
    pub domain: String,
    pub process: String,
    pub step: String,
    pub status: LogStatus,
    pub message: String,
}

/// Destination for run-log entries.
#[async_trait]
pub trait LogSink: Debug + Send + Sync {
    /// Persists one entry.
    async fn write(&self, entry: &LogEntry) -> Result<()>;
}

/// Filter over run-log entries.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    status: Option<LogStatus>,
    step: Option<String>,
    limit: Option<usize>,
}

impl LogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps only entries with this status.
    pub fn status(mut self, status: LogStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Keeps only entries for this step.
    pub fn step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    /// Returns at most `limit` entries.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, entry: &LogEntry) -> bool {
        self.status.map_or(true, |s| entry.status == s)
            && self.step.as_deref().map_or(true, |s| entry.step == s)
    }

    /// Applies the filter and limit to a sequence of entries.
    pub fn apply<'a, I>(&self, entries: I) -> Vec<LogEntry>
    where
        I: IntoIterator<Item = &'a LogEntry>,
    {
        entries
            .into_iter()
            .filter(|e| self.matches(e))
            .take(self.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }
}

/// Keeps entries in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries recorded so far, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().clone()
    }

    /// Entries matching `filter`.
    pub fn query(&self, filter: &LogFilter) -> Vec<LogEntry> {
        filter.apply(self.lock().iter())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<LogEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl LogSink for MemorySink {
    async fn write(&self, entry: &LogEntry) -> Result<()> {
        self.lock().push(entry.clone());
        Ok(())
    }
}

/// Appends entries as JSON lines to a file, creating it if needed.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads back entries matching `filter`. A missing file yields no entries.
    pub fn read_entries(path: impl AsRef<Path>, filter: &LogFilter) -> Result<Vec<LogEntry>> {
        let path = path.as_ref();
        let file = match std::fs::File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str::<LogEntry>(&line)?);
        }
        Ok(filter.apply(entries.iter()))
    }
}

#[async_trait]
impl LogSink for JsonLinesSink {
    async fn write(&self, entry: &LogEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Mirrors entries into `tracing` events.
#[derive(Debug, Clone)]
pub struct TracingSink {
    max_message_length: usize,
}

impl Default for TracingSink {
    fn default() -> Self {
        Self {
            max_message_length: 1024,
        }
    }
}

impl TracingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_message_length(mut self, max: usize) -> Self {
        self.max_message_length = max;
        self
    }
}

#[async_trait]
impl LogSink for TracingSink {
    async fn write(&self, entry: &LogEntry) -> Result<()> {
        let message = truncate_field(&entry.message, self.max_message_length);
        match entry.status {
            LogStatus::Success => tracing::info!(
                run.domain = %entry.domain,
                run.process = %entry.process,
                run.source = %entry.source,
                run.step = %entry.step,
                "{message}"
            ),
            LogStatus::Warning => tracing::warn!(
                run.domain = %entry.domain,
                run.process = %entry.process,
                run.source = %entry.source,
                run.step = %entry.step,
                "{message}"
            ),
            LogStatus::Failure => tracing::error!(
                run.domain = %entry.domain,
                run.process = %entry.process,
                run.source = %entry.source,
                run.step = %entry.step,
                "{message}"
            ),
        }
        Ok(())
    }
}

/// Resolves the acting principal from the environment.
fn detect_principal() -> String {
    ["INGEST_USER", "USER", "USERNAME"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "unknown_user".to_string())
}

/// Records pipeline steps to a set of sinks.
///
/// Cloning is cheap; clones share sinks. [`scoped`](Self::scoped) derives a
/// logger attributed to another component.
#[derive(Debug, Clone)]
pub struct RunLogger {
    domain: String,
    process: String,
    source: String,
    principal: String,
    sinks: Vec<Arc<dyn LogSink>>,
}

impl RunLogger {
    /// Creates a logger with no sinks. The principal is resolved once, here.
    pub fn new(domain: impl Into<String>, process: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            process: process.into(),
            source: env!("CARGO_PKG_NAME").to_string(),
            principal: detect_principal(),
            sinks: Vec::new(),
        }
    }

    /// Adds a sink.
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Overrides the detected principal.
    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = principal.into();
        self
    }

    /// Sets the originating component.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// A clone attributed to `source`.
    pub fn scoped(&self, source: impl Into<String>) -> Self {
        self.clone().with_source(source)
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn process(&self) -> &str {
        &self.process
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Records one step. Empty steps or messages are rejected with a warning.
    pub async fn log(&self, step: &str, status: LogStatus, message: impl Into<String>) {
        let message = message.into();
        if step.trim().is_empty() || message.trim().is_empty() {
            tracing::warn!(
                run.step = %step,
                "Dropping run-log entry: step and message must be non-empty"
            );
            return;
        }

        let entry = LogEntry {
            timestamp: Utc::now(),
            principal: self.principal.clone(),
            source: self.source.clone(),
            domain: self.domain.clone(),
            process: self.process.clone(),
            step: step.to_string(),
            status,
            message,
        };

        for sink in &self.sinks {
            if let Err(e) = sink.write(&entry).await {
                tracing::warn!(
                    sink = ?sink,
                    run.step = %entry.step,
                    error = %e,
                    "Failed to write run-log entry"
                );
            }
        }
    }

    pub async fn success(&self, step: &str, message: impl Into<String>) {
        self.log(step, LogStatus::Success, message).await;
    }

    pub async fn warning(&self, step: &str, message: impl Into<String>) {
        self.log(step, LogStatus::Warning, message).await;
    }

    pub async fn failure(&self, step: &str, message: impl Into<String>) {
        self.log(step, LogStatus::Failure, message).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct BrokenSink;

    #[async_trait]
    impl LogSink for BrokenSink {
        async fn write(&self, _entry: &LogEntry) -> Result<()> {
            Err(IngestError::Internal("sink offline".to_string()))
        }
    }

    fn logger_with_memory() -> (RunLogger, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let logger = RunLogger::new("member", "bronze_ingestion")
            .with_principal("tester")
            .with_sink(sink.clone());
        (logger, sink)
    }

    #[tokio::test]
    async fn test_entry_carries_attribution() {
        let (logger, sink) = logger_with_memory();
        logger.scoped("discovery").success("discover_tables", "Found 2 tables").await;

        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.domain, "member");
        assert_eq!(entry.process, "bronze_ingestion");
        assert_eq!(entry.source, "discovery");
        assert_eq!(entry.principal, "tester");
        assert_eq!(entry.status, LogStatus::Success);
    }

    #[tokio::test]
    async fn test_empty_step_or_message_is_dropped() {
        let (logger, sink) = logger_with_memory();
        logger.success("", "message").await;
        logger.failure("step", "  ").await;
        assert!(sink.entries().is_empty());
    }

    #[tokio::test]
    async fn test_failing_sink_does_not_block_others() {
        let sink = Arc::new(MemorySink::new());
        let logger = RunLogger::new("d", "p")
            .with_sink(Arc::new(BrokenSink))
            .with_sink(sink.clone());

        logger.warning("extract_all", "1 failed").await;
        assert_eq!(sink.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_filter_by_status_step_and_limit() {
        let (logger, sink) = logger_with_memory();
        logger.success("validate", "ok").await;
        logger.failure("validate", "bad 1").await;
        logger.failure("write", "bad 2").await;
        logger.failure("validate", "bad 3").await;

        let failures = sink.query(&LogFilter::new().status(LogStatus::Failure));
        assert_eq!(failures.len(), 3);

        let validate_failures = sink.query(
            &LogFilter::new()
                .status(LogStatus::Failure)
                .step("validate")
                .limit(1),
        );
        assert_eq!(validate_failures.len(), 1);
        assert_eq!(validate_failures[0].message, "bad 1");
    }

    #[tokio::test]
    async fn test_json_lines_sink_keeps_concurrent_entries_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extraction.jsonl");
        let logger = RunLogger::new("d", "p").with_sink(Arc::new(JsonLinesSink::new(&path)));

        futures::future::join_all((0..20).map(|i| {
            let logger = logger.clone();
            async move { logger.success("union_chunks", format!("table {i}")).await }
        }))
        .await;

        let all = JsonLinesSink::read_entries(&path, &LogFilter::new()).unwrap();
        assert_eq!(all.len(), 20);
        assert!(all.iter().all(|e| e.step == "union_chunks"));
    }

    #[tokio::test]
    async fn test_json_lines_sink_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("extraction.jsonl");
        let logger = RunLogger::new("d", "p").with_sink(Arc::new(JsonLinesSink::new(&path)));

        logger.success("read_meta", "Read meta for 'customers'").await;
        logger.failure("archive_files", "denied").await;

        let all = JsonLinesSink::read_entries(&path, &LogFilter::new()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].status, LogStatus::Failure);

        let missing = JsonLinesSink::read_entries(dir.path().join("nope"), &LogFilter::new());
        assert!(missing.unwrap().is_empty());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&LogStatus::Warning).unwrap(),
            "\"warning\""
        );
    }
}
