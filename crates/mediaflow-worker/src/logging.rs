//! Structured task logging.

use tracing::{error, info, warn, Span};

use mediaflow_models::TaskMessage;

/// Logger carrying the identity of the task a delivery points at.
#[derive(Debug, Clone)]
pub struct TaskLogger {
    task_id: String,
    media_id: String,
    step: String,
    worker_id: String,
}

impl TaskLogger {
    pub fn new(message: &TaskMessage, worker_id: &str) -> Self {
        Self {
            task_id: message.task_id.to_string(),
            media_id: message.media_id.to_string(),
            step: message.step.clone(),
            worker_id: worker_id.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            task_id = %self.task_id,
            media_id = %self.media_id,
            step = %self.step,
            worker_id = %self.worker_id,
            "Task started: {}", message
        );
    }

    pub fn log_warning(&self, retry_count: u32, message: &str) {
        warn!(
            task_id = %self.task_id,
            media_id = %self.media_id,
            step = %self.step,
            worker_id = %self.worker_id,
            retry_count,
            "Task warning: {}", message
        );
    }

    pub fn log_error(&self, retry_count: u32, message: &str) {
        error!(
            task_id = %self.task_id,
            media_id = %self.media_id,
            step = %self.step,
            worker_id = %self.worker_id,
            retry_count,
            "Task error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            task_id = %self.task_id,
            media_id = %self.media_id,
            step = %self.step,
            worker_id = %self.worker_id,
            "Task completed: {}", message
        );
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn step(&self) -> &str {
        &self.step
    }

    /// Span wrapping everything done for one delivery.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "task",
            task_id = %self.task_id,
            step = %self.step
        )
    }
}
