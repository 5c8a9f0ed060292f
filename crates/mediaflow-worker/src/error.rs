//! Worker error types.

use std::time::Duration;

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Failure reported by a work unit or by the engine around it.
#[derive(Debug, Error)]
pub enum WorkError {
    /// Retrying cannot help: bad input, unknown step
    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("work failed: {0}")]
    Failed(String),

    #[error("work timed out after {0:?}")]
    Timeout(Duration),

    #[error("storage error: {0}")]
    Storage(#[from] mediaflow_storage::StorageError),
}

impl WorkError {
    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// Permanent failures skip the retry budget.
    pub fn is_permanent(&self) -> bool {
        matches!(self, WorkError::Permanent(_))
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Task store error: {0}")]
    Store(#[from] mediaflow_db::DbError),

    #[error("Storage error: {0}")]
    Storage(#[from] mediaflow_storage::StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] mediaflow_queue::QueueError),

    #[error("Work error: {0}")]
    Work(#[from] WorkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Store(_) | WorkerError::Storage(_) | WorkerError::Io(_) => true,
            WorkerError::Queue(e) => e.is_retryable(),
            WorkerError::Work(e) => !e.is_permanent(),
            WorkerError::ConfigError(_) => false,
        }
    }
}
