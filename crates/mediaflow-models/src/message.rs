//! Transport task pointer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::media::MediaId;
use crate::task::TaskId;

/// Lightweight pointer published to the transport.
///
/// Carries identity only; all state lives in the task store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task_id: TaskId,
    pub media_id: MediaId,
    pub step: String,
}

/// A delivery body that cannot be trusted as a task pointer.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("invalid task message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("task message is missing {0}")]
    MissingField(&'static str),
}

impl TaskMessage {
    pub fn new(task_id: TaskId, media_id: MediaId, step: impl Into<String>) -> Self {
        Self {
            task_id,
            media_id,
            step: step.into(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, MessageError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a delivery body, rejecting pointers with empty identifiers.
    pub fn from_bytes(body: &[u8]) -> Result<Self, MessageError> {
        let message: TaskMessage = serde_json::from_slice(body)?;
        if message.task_id.as_str().trim().is_empty() {
            return Err(MessageError::MissingField("task_id"));
        }
        if message.step.trim().is_empty() {
            return Err(MessageError::MissingField("step"));
        }
        Ok(message)
    }
}
