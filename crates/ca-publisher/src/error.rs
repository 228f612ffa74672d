//! Publisher error and outcome types

use ca_publish_proto::ArtifactError;
use std::fmt;
use thiserror::Error;

/// Errors raised at a publisher boundary
#[derive(Error, Debug)]
pub enum PublishError {
    /// Target could not be reached (connect failure, timeout, server down)
    #[error("Target unreachable: {0}")]
    Unreachable(String),

    /// Artifact could not be encoded for the target
    #[error("Encoding error: {0}")]
    Encoding(#[from] ArtifactError),

    /// Directory server refused the read or modify
    #[error("Directory error: {0}")]
    Directory(String),

    /// Filesystem or socket I/O failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Target answered but refused the artifact
    #[error("Rejected by target: {0}")]
    Rejected(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller cancelled the call
    #[error("Operation cancelled")]
    Cancelled,

    /// Caller deadline passed before the call completed
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// Every failover attempt failed
    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    /// Target descriptor cannot be used for this artifact
    #[error("Invalid target: {0}")]
    InvalidTarget(String),
}

impl PublishError {
    /// Whether the failure means the target could not be reached at all
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            PublishError::Unreachable(_) | PublishError::RetriesExhausted { .. }
        )
    }

    /// Short stable label used in logs and audit records
    pub fn category(&self) -> &'static str {
        match self {
            PublishError::Unreachable(_) => "unreachable",
            PublishError::Encoding(_) => "encoding",
            PublishError::Directory(_) => "directory",
            PublishError::Io(_) => "io",
            PublishError::Rejected(_) => "rejected",
            PublishError::Config(_) => "config",
            PublishError::Cancelled => "cancelled",
            PublishError::DeadlineExceeded => "deadline",
            PublishError::RetriesExhausted { .. } => "retries_exhausted",
            PublishError::InvalidTarget(_) => "invalid_target",
        }
    }
}

/// Result type for publisher operations
pub type PublishResult<T> = Result<T, PublishError>;

/// What a successful (or absorbed) publisher call did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishReport {
    /// Target was changed; `changes` counts modifications or files written
    Applied { changes: usize },
    /// Target already matched the desired state
    Unchanged,
    /// Artifact does not concern this target
    Skipped(String),
    /// Call failed under a fail-open policy; the error was logged
    Absorbed(String),
}

impl PublishReport {
    pub fn is_applied(&self) -> bool {
        matches!(self, PublishReport::Applied { .. })
    }
}

impl fmt::Display for PublishReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishReport::Applied { changes } => write!(f, "applied ({} changes)", changes),
            PublishReport::Unchanged => write!(f, "unchanged"),
            PublishReport::Skipped(reason) => write!(f, "skipped: {}", reason),
            PublishReport::Absorbed(error) => write!(f, "failed (ignored): {}", error),
        }
    }
}
