//! Pipeline chaining.
//!
//! After a step succeeds, the next step is dispatched with this step's
//! output as its input; the last step completes the media item.

use std::sync::Arc;

use tracing::{info, warn};

use mediaflow_db::MediaStore;
use mediaflow_models::ProcessingTask;
use mediaflow_queue::{DispatchOutcome, TaskDispatcher};

use crate::error::WorkerResult;

/// Where a step sits in the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextStep<'a> {
    Step(&'a str),
    Last,
    /// Step is not part of the configured pipeline
    Unknown,
}

/// Ordered list of steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    steps: Vec<String>,
}

impl Pipeline {
    pub fn new(steps: Vec<String>) -> Self {
        Self { steps }
    }

    pub fn first(&self) -> Option<&str> {
        self.steps.first().map(String::as_str)
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    pub fn next_after(&self, step: &str) -> NextStep<'_> {
        match self.steps.iter().position(|s| s == step) {
            None => NextStep::Unknown,
            Some(i) => match self.steps.get(i + 1) {
                Some(next) => NextStep::Step(next),
                None => NextStep::Last,
            },
        }
    }
}

/// Moves the pipeline forward once a task's output exists.
#[derive(Clone)]
pub struct PipelineAdvancer {
    pipeline: Pipeline,
    dispatcher: TaskDispatcher,
    media: Arc<dyn MediaStore>,
}

impl PipelineAdvancer {
    pub fn new(pipeline: Pipeline, dispatcher: TaskDispatcher, media: Arc<dyn MediaStore>) -> Self {
        Self {
            pipeline,
            dispatcher,
            media,
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Dispatch the next step or complete the media. Safe to repeat.
    pub async fn advance(&self, task: &ProcessingTask) -> WorkerResult<()> {
        match self.pipeline.next_after(&task.step) {
            NextStep::Step(next) => {
                let outcome = self
                    .dispatcher
                    .dispatch(&task.media_id, next, &task.output_key)
                    .await?;
                if outcome == DispatchOutcome::Duplicate {
                    info!(media_id = %task.media_id, step = next, "Next step already scheduled");
                }
            }
            NextStep::Last => {
                self.media
                    .complete_media(&task.media_id, &task.output_key)
                    .await?;
                info!(media_id = %task.media_id, final_key = %task.output_key, "Media complete");
            }
            NextStep::Unknown => {
                warn!(
                    media_id = %task.media_id,
                    step = %task.step,
                    "Step is not in the configured pipeline, nothing to chain"
                );
            }
        }
        Ok(())
    }

    /// Mark the media failed after a terminal task failure. Best effort.
    pub async fn fail(&self, task: &ProcessingTask) {
        if let Err(e) = self.media.fail_media(&task.media_id).await {
            warn!(media_id = %task.media_id, error = %e, "Failed to mark media failed");
        }
    }
}
