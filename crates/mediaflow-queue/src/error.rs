//! Queue error types.

use mediaflow_db::DbError;
use mediaflow_models::MessageError;
use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown delivery: {0}")]
    UnknownDelivery(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    #[error("Task store error: {0}")]
    Store(#[from] DbError),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn publish_failed(msg: impl Into<String>) -> Self {
        Self::PublishFailed(msg.into())
    }

    /// Infrastructure hiccups worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            QueueError::ConnectionFailed(_)
            | QueueError::PublishFailed(_)
            | QueueError::Unavailable(_)
            | QueueError::Store(_) => true,
            QueueError::Redis(e) => e.is_io_error() || e.is_timeout() || e.is_connection_dropped(),
            QueueError::UnknownDelivery(_) | QueueError::Message(_) => false,
        }
    }
}
