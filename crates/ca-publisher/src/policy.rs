//! Failure policy, call context and failover retry settings

use crate::error::{PublishError, PublishResult};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Granularity of cancellable sleeps
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// How a publisher reports failures to its caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Return the error to the caller
    FailClosed,
    /// Log the error and report [`crate::PublishReport::Absorbed`]
    FailOpen,
}

impl FailurePolicy {
    pub fn is_fail_open(self) -> bool {
        self == FailurePolicy::FailOpen
    }
}

/// Per-call deadline and cancellation hook
///
/// A default context never expires and cannot be cancelled.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: Option<CancellationToken>,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    /// Time left before the deadline, `None` when there is no deadline
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fail if the call was cancelled or its deadline has passed
    pub fn check(&self) -> PublishResult<()> {
        if self.is_cancelled() {
            return Err(PublishError::Cancelled);
        }
        if matches!(self.remaining(), Some(left) if left.is_zero()) {
            return Err(PublishError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Sleep for `duration`, waking early on cancellation or deadline
    pub fn sleep(&self, duration: Duration) -> PublishResult<()> {
        let until = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            let mut slice = (until - now).min(SLEEP_SLICE);
            if let Some(left) = self.remaining() {
                slice = slice.min(left);
            }
            std::thread::sleep(slice);
        }
    }

    /// Narrow the context to an additional deadline
    pub fn bounded_by(&self, deadline: Option<Instant>) -> CallContext {
        let deadline = match (self.deadline, deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        CallContext {
            deadline,
            cancel: self.cancel.clone(),
        }
    }
}

/// Host failover retry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay between failed attempts in seconds
    #[serde(default = "default_retry_interval")]
    pub retry_interval: u64,

    /// Upper bound on connection attempts across all hosts
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Overall time budget for the failover loop in seconds
    #[serde(default)]
    pub deadline: Option<u64>,
}

fn default_retry_interval() -> u64 {
    5
}

fn default_max_attempts() -> u32 {
    60
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            retry_interval: default_retry_interval(),
            max_attempts: default_max_attempts(),
            deadline: None,
        }
    }
}

impl RetryPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval)
    }

    /// Deadline of a failover loop starting now
    pub fn deadline_from_now(&self) -> Option<Instant> {
        self.deadline
            .map(|secs| Instant::now() + Duration::from_secs(secs))
    }
}
