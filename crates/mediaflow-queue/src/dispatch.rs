//! Task creation and dispatch.

use std::sync::Arc;

use tracing::{error, info, warn};

use mediaflow_db::TaskStore;
use mediaflow_models::{MediaId, NewTask, PipelineEvent, PipelineObserver, TaskId, TaskMessage};

use crate::error::QueueResult;
use crate::transport::Transport;

/// Result of a dispatch call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Row inserted and pointer published
    Created(TaskId),
    /// A row for (media, step) already existed; nothing published
    Duplicate,
}

/// Inserts a task once per (media, step) and publishes its pointer only
/// when this call did the insert.
#[derive(Clone)]
pub struct TaskDispatcher {
    tasks: Arc<dyn TaskStore>,
    transport: Arc<dyn Transport>,
    observer: Arc<dyn PipelineObserver>,
}

impl TaskDispatcher {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        transport: Arc<dyn Transport>,
        observer: Arc<dyn PipelineObserver>,
    ) -> Self {
        Self {
            tasks,
            transport,
            observer,
        }
    }

    pub async fn dispatch(
        &self,
        media_id: &MediaId,
        step: &str,
        input_key: &str,
    ) -> QueueResult<DispatchOutcome> {
        let task = NewTask::new(media_id.clone(), step, input_key);
        let body = TaskMessage::new(task.id.clone(), media_id.clone(), step).to_bytes()?;

        if !self.tasks.insert_task_if_absent(&task).await? {
            info!(media_id = %media_id, step, "Task already exists, not publishing");
            self.observer.record(&PipelineEvent::TaskDuplicate {
                step: step.to_string(),
            });
            return Ok(DispatchOutcome::Duplicate);
        }
        self.observer.record(&PipelineEvent::TaskCreated {
            step: step.to_string(),
        });

        if let Err(e) = self.transport.publish(&body).await {
            self.withdraw_unpublished(&task, e.to_string()).await;
            return Err(e);
        }

        info!(task_id = %task.id, media_id = %media_id, step, "Dispatched task");
        self.observer.record(&PipelineEvent::TaskPublished {
            step: step.to_string(),
        });
        Ok(DispatchOutcome::Created(task.id))
    }

    /// Remove a row whose pointer never reached the transport, so the next
    /// dispatch for the same (media, step) inserts and publishes afresh.
    async fn withdraw_unpublished(&self, task: &NewTask, publish_error: String) {
        match self.tasks.withdraw_task(&task.id).await {
            Ok(true) => warn!(
                task_id = %task.id,
                media_id = %task.media_id,
                step = %task.step,
                error = %publish_error,
                "Pointer not published, task withdrawn"
            ),
            Ok(false) => warn!(
                task_id = %task.id,
                error = %publish_error,
                "Pointer not published and task already picked up"
            ),
            Err(e) => error!(
                task_id = %task.id,
                media_id = %task.media_id,
                step = %task.step,
                error = %publish_error,
                withdraw_error = %e,
                "Pointer not published and task could not be withdrawn"
            ),
        }
    }
}
