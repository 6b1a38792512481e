//! Audit trail of outbound registry attempts.
//!
//! One record per HTTP attempt and one per rejection before the network
//! (open circuit, local rate limit). An attempt abandoned mid-flight is
//! recorded as `cancelled`. Records are append-only. Identifiers are
//! stored redacted, with a truncated hash for correlation.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::identifier::Identifier;

/// How an attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Found,
    NotFound,
    /// Network error, 5xx, timeout or unusable body.
    Failure,
    /// Upstream 429.
    Throttled,
    /// Stopped before the network by the breaker or the local limiter.
    Rejected,
    /// Credentials refused.
    Fatal,
    UnexpectedStatus,
    /// Caller went away while the request was in flight.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Redacted identifier, never the full value.
    pub identifier: String,
    pub fingerprint: String,
    pub endpoint: String,
    pub http_status: Option<u16>,
    pub latency_ms: u64,
    pub outcome: AuditOutcome,
    pub error: Option<String>,
}

impl AuditRecord {
    pub fn new(
        identifier: &Identifier,
        endpoint: &str,
        http_status: Option<u16>,
        latency: Duration,
        outcome: AuditOutcome,
        error: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            identifier: identifier.redacted(),
            fingerprint: identifier.fingerprint(),
            endpoint: endpoint.to_string(),
            http_status,
            latency_ms: latency.as_millis() as u64,
            outcome,
            error,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Audit I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Append-only destination for audit records.
#[async_trait]
pub trait AuditSink: Send + Sync + std::fmt::Debug {
    async fn write(&self, record: &AuditRecord) -> Result<(), AuditError>;
}

/// Emits each record as a structured log event on the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn write(&self, record: &AuditRecord) -> Result<(), AuditError> {
        tracing::info!(
            target: "audit",
            id = %record.id,
            identifier = %record.identifier,
            fingerprint = %record.fingerprint,
            endpoint = %record.endpoint,
            http_status = ?record.http_status,
            latency_ms = record.latency_ms,
            outcome = ?record.outcome,
            error = ?record.error,
            "Registry attempt"
        );
        Ok(())
    }
}

/// Appends one JSON object per line to a file.
#[derive(Debug)]
pub struct JsonLinesAuditSink {
    path: PathBuf,
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl JsonLinesAuditSink {
    /// Open `path` for appending, creating it if needed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        tracing::info!(path = %path.display(), "Audit file opened");
        Ok(Self {
            path,
            file: tokio::sync::Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for JsonLinesAuditSink {
    async fn write(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Keeps records in memory, for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn write(&self, record: &AuditRecord) -> Result<(), AuditError> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(outcome: AuditOutcome) -> AuditRecord {
        let id = Identifier::parse("732829320").unwrap();
        AuditRecord::new(&id, "siren", Some(200), Duration::from_millis(42), outcome, None)
    }

    #[test]
    fn test_record_never_holds_full_identifier() {
        let r = record(AuditOutcome::Found);
        assert_eq!(r.identifier, "732******");
        assert_eq!(r.fingerprint.len(), 16);
        assert_eq!(r.latency_ms, 42);
        let json = serde_json::to_string(&r).unwrap();
        assert!(!json.contains("732829320"));
    }

    #[tokio::test]
    async fn test_json_lines_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let sink = JsonLinesAuditSink::open(&path).await.unwrap();
        sink.write(&record(AuditOutcome::Found)).await.unwrap();
        sink.write(&record(AuditOutcome::NotFound)).await.unwrap();
        drop(sink);

        // Reopening appends instead of truncating.
        let sink = JsonLinesAuditSink::open(&path).await.unwrap();
        sink.write(&record(AuditOutcome::Failure)).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        let last: serde_json::Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(last["outcome"], "failure");
        assert_eq!(last["http_status"], 200);
    }

    #[tokio::test]
    async fn test_memory_sink() {
        let sink = MemoryAuditSink::new();
        sink.write(&record(AuditOutcome::Rejected)).await.unwrap();
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.records()[0].outcome, AuditOutcome::Rejected);
    }
}
