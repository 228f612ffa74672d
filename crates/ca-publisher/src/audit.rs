//! Audit logging for publication events
//!
//! Every publish and unpublish outcome is recorded as one structured entry.
//! [`AuditLogger`] appends them to a JSON Lines file for compliance review;
//! embedders can plug in their own [`AuditSink`].

use crate::error::{PublishError, PublishReport};
use ca_publish_proto::Artifact;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::error;

/// Audit event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// Target changed by a publish
    PublishSuccess,
    /// Publish found the target already up to date
    PublishUnchanged,
    /// Artifact did not apply to the target
    PublishSkipped,
    /// Publish failed and the error was returned
    PublishFailure,
    /// Publish failed under a fail-open policy
    PublishAbsorbed,
    /// Target changed by an unpublish
    UnpublishSuccess,
    /// Unpublish failed
    UnpublishFailure,
}

/// Which operation an entry describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Publish,
    Unpublish,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Publish => "publish",
            Operation::Unpublish => "unpublish",
        }
    }
}

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Timestamp (Unix epoch seconds)
    pub timestamp: u64,
    /// ISO 8601 formatted timestamp
    pub timestamp_iso: String,
    pub event_type: AuditEventType,
    /// Publisher variant (e.g. `ldap:crl`, `file`, `ocsp`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    /// Target identity (DN, directory, responder hosts)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    /// SHA-256 of the artifact bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Modifications or files written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub publisher_version: String,
}

impl AuditEntry {
    /// Create a new audit entry
    pub fn new(event_type: AuditEventType) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();

        let timestamp = now.as_secs();
        let timestamp_iso = chrono::DateTime::from_timestamp(timestamp as i64, 0)
            .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
            .unwrap_or_else(|| "unknown".to_string());

        AuditEntry {
            timestamp,
            timestamp_iso,
            event_type,
            publisher: None,
            target: None,
            artifact: None,
            fingerprint: None,
            changes: None,
            details: None,
            publisher_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Entry describing the outcome of one publisher call
    pub fn for_outcome(
        operation: Operation,
        publisher: &str,
        target: &str,
        artifact: &Artifact,
        outcome: Result<&PublishReport, &PublishError>,
    ) -> Self {
        let event_type = match (operation, outcome) {
            (Operation::Publish, Ok(PublishReport::Applied { .. })) => AuditEventType::PublishSuccess,
            (Operation::Publish, Ok(PublishReport::Unchanged)) => AuditEventType::PublishUnchanged,
            (Operation::Publish, Ok(PublishReport::Skipped(_))) => AuditEventType::PublishSkipped,
            (Operation::Publish, Ok(PublishReport::Absorbed(_))) => AuditEventType::PublishAbsorbed,
            (Operation::Publish, Err(_)) => AuditEventType::PublishFailure,
            (Operation::Unpublish, Ok(PublishReport::Absorbed(_))) | (Operation::Unpublish, Err(_)) => {
                AuditEventType::UnpublishFailure
            }
            (Operation::Unpublish, Ok(_)) => AuditEventType::UnpublishSuccess,
        };

        let mut entry = AuditEntry::new(event_type)
            .with_publisher(publisher)
            .with_target(target)
            .with_artifact(artifact);

        match outcome {
            Ok(PublishReport::Applied { changes }) => entry.changes = Some(*changes),
            Ok(PublishReport::Unchanged) => entry.changes = Some(0),
            Ok(PublishReport::Skipped(reason)) => entry.details = Some(reason.clone()),
            Ok(PublishReport::Absorbed(error)) => entry.details = Some(error.clone()),
            Err(e) => entry.details = Some(e.to_string()),
        }
        entry
    }

    pub fn with_publisher(mut self, publisher: impl Into<String>) -> Self {
        self.publisher = Some(publisher.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Set artifact description and fingerprint
    pub fn with_artifact(mut self, artifact: &Artifact) -> Self {
        self.artifact = Some(artifact.describe());
        self.fingerprint = Some(artifact.fingerprint());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Receiver of audit entries
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry);
}

/// Sink that drops every entry
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _entry: AuditEntry) {}
}

/// Sink that keeps entries in memory
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn event_types(&self) -> Vec<AuditEventType> {
        self.entries().iter().map(|e| e.event_type).collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, entry: AuditEntry) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }
}

/// Audit logger
pub struct AuditLogger {
    /// File path for audit log
    file_path: Option<String>,
    file: Option<Mutex<std::fs::File>>,
}

impl AuditLogger {
    /// Create a new audit logger
    pub fn new(file_path: Option<String>) -> std::io::Result<Self> {
        let file = if let Some(ref path) = file_path {
            let f = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            Some(Mutex::new(f))
        } else {
            None
        };

        Ok(AuditLogger { file_path, file })
    }

    /// Log an audit entry
    pub fn log(&self, entry: &AuditEntry) {
        if let Some(ref file) = self.file {
            match serde_json::to_string(entry) {
                Ok(json) => {
                    let mut f = file.lock().unwrap_or_else(|e| e.into_inner());
                    if let Err(e) = writeln!(f, "{}", json) {
                        error!("Failed to write audit log: {}", e);
                    }
                }
                Err(e) => {
                    error!("Failed to serialize audit entry: {}", e);
                }
            }
        }
    }

    /// Check if audit logging is enabled
    pub fn is_enabled(&self) -> bool {
        self.file.is_some()
    }

    /// Get the audit log file path
    pub fn file_path(&self) -> Option<&str> {
        self.file_path.as_deref()
    }
}

impl AuditSink for AuditLogger {
    fn record(&self, entry: AuditEntry) {
        self.log(&entry);
    }
}
