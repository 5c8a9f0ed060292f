//! Processing task models.
//!
//! A [`ProcessingTask`] is the durable record the worker pool leases,
//! executes and resolves. Its lifecycle:
//!
//! ```text
//! PENDING --claim--> RUNNING --ok--> SUCCEEDED
//!    ^                  |
//!    |                  +--recoverable, budget left--> RETRY --claim--> RUNNING
//!    |                  +--budget exhausted----------> FAILED
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::keys::output_key;
use crate::media::MediaId;

/// Unique identifier for a processing task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generate a new random task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unrecognised status string read back from storage.
#[derive(Debug, Clone, Error)]
#[error("unknown status: {0}")]
pub struct ParseStatusError(pub String);

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Created, never claimed
    #[default]
    Pending,
    /// Leased by a worker
    Running,
    /// Output produced and recorded
    Succeeded,
    /// Retry budget exhausted or permanent failure
    Failed,
    /// Waiting out a backoff window before the next attempt
    Retry,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Succeeded => "SUCCEEDED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Retry => "RETRY",
        }
    }

    /// No claim, retry or mutation happens once a terminal state is reached.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }

    /// Statuses from which a task may be claimed once its lease is clear.
    pub fn is_claimable(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Retry)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TaskStatus::Pending),
            "RUNNING" => Ok(TaskStatus::Running),
            "SUCCEEDED" => Ok(TaskStatus::Succeeded),
            "FAILED" => Ok(TaskStatus::Failed),
            "RETRY" => Ok(TaskStatus::Retry),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// Durable task record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingTask {
    /// Task identity, embedded in the transport pointer
    pub id: TaskId,
    /// Parent media item
    pub media_id: MediaId,
    /// Pipeline stage identifier
    pub step: String,
    /// Lifecycle status
    pub status: TaskStatus,
    /// Failed attempts so far
    pub retry_count: u32,
    /// Object key consumed by the work unit
    pub input_key: String,
    /// Object key the work unit must produce
    pub output_key: String,
    /// Current or last claimant
    pub lock_owner: Option<String>,
    /// Lease expiry
    pub lock_until: Option<DateTime<Utc>>,
    /// Most recent failure description
    pub last_error: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl ProcessingTask {
    /// Admission condition: eligible status and no live lease at `now`.
    pub fn is_claimable_at(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && self.lock_until.map_or(true, |until| until < now)
    }

    /// True if a lease is held at `now`.
    pub fn is_leased_at(&self, now: DateTime<Utc>) -> bool {
        self.lock_until.is_some_and(|until| until >= now)
    }
}

/// Insert payload for a new task row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub id: TaskId,
    pub media_id: MediaId,
    pub step: String,
    pub input_key: String,
    pub output_key: String,
}

impl NewTask {
    /// Build a task for `step` with the deterministic output key for the pair.
    pub fn new(media_id: MediaId, step: impl Into<String>, input_key: impl Into<String>) -> Self {
        let step = step.into();
        Self {
            id: TaskId::new(),
            output_key: output_key(&media_id, &step),
            media_id,
            step,
            input_key: input_key.into(),
        }
    }

    /// Materialise the row as it looks right after insertion.
    pub fn into_record(self, now: DateTime<Utc>) -> ProcessingTask {
        ProcessingTask {
            id: self.id,
            media_id: self.media_id,
            step: self.step,
            status: TaskStatus::Pending,
            retry_count: 0,
            input_key: self.input_key,
            output_key: self.output_key,
            lock_owner: None,
            lock_until: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}
