//! Pipeline metrics.
//!
//! [`MetricsObserver`] turns [`PipelineEvent`]s into `metrics` counters. The
//! engine never touches the recorder directly; whoever installs the
//! Prometheus exporter decides where these end up.

use metrics::{counter, histogram};
use mediaflow_models::{PipelineEvent, PipelineObserver};

// =============================================================================
// Metric Names
// =============================================================================

/// Metric name constants for consistency.
pub mod names {
    pub const TASKS_CREATED_TOTAL: &str = "mediaflow_tasks_created_total";
    pub const TASKS_DUPLICATE_TOTAL: &str = "mediaflow_tasks_duplicate_total";
    pub const TASKS_PUBLISHED_TOTAL: &str = "mediaflow_tasks_published_total";
    pub const TASKS_CLAIMED_TOTAL: &str = "mediaflow_tasks_claimed_total";
    pub const TASKS_CONTENDED_TOTAL: &str = "mediaflow_tasks_contended_total";
    pub const TASKS_DEFERRED_TOTAL: &str = "mediaflow_tasks_deferred_total";
    pub const TASKS_RECOVERED_TOTAL: &str = "mediaflow_tasks_recovered_total";
    pub const TASKS_SKIPPED_TOTAL: &str = "mediaflow_tasks_skipped_total";
    pub const TASKS_PROCESSED_TOTAL: &str = "mediaflow_tasks_processed_total";
    pub const TASKS_RETRIED_TOTAL: &str = "mediaflow_tasks_retried_total";
    pub const TASKS_FAILED_TOTAL: &str = "mediaflow_tasks_failed_total";
    pub const MESSAGES_REJECTED_TOTAL: &str = "mediaflow_tasks_rejected_total";
    pub const TRANSIENT_ERRORS_TOTAL: &str = "mediaflow_tasks_transient_total";

    /// Work unit duration in seconds by step.
    pub const WORK_DURATION_SECONDS: &str = "mediaflow_work_duration_seconds";
}

/// Name of the counter an event increments.
pub fn counter_name(event: &PipelineEvent) -> &'static str {
    match event {
        PipelineEvent::TaskCreated { .. } => names::TASKS_CREATED_TOTAL,
        PipelineEvent::TaskDuplicate { .. } => names::TASKS_DUPLICATE_TOTAL,
        PipelineEvent::TaskPublished { .. } => names::TASKS_PUBLISHED_TOTAL,
        PipelineEvent::Claimed { .. } => names::TASKS_CLAIMED_TOTAL,
        PipelineEvent::ClaimContended => names::TASKS_CONTENDED_TOTAL,
        PipelineEvent::ClaimDeferred => names::TASKS_DEFERRED_TOTAL,
        PipelineEvent::LeaseRecovered => names::TASKS_RECOVERED_TOTAL,
        PipelineEvent::Skipped { .. } => names::TASKS_SKIPPED_TOTAL,
        PipelineEvent::Succeeded { .. } => names::TASKS_PROCESSED_TOTAL,
        PipelineEvent::Retried { .. } => names::TASKS_RETRIED_TOTAL,
        PipelineEvent::Failed { .. } => names::TASKS_FAILED_TOTAL,
        PipelineEvent::Rejected => names::MESSAGES_REJECTED_TOTAL,
        PipelineEvent::Transient => names::TRANSIENT_ERRORS_TOTAL,
    }
}

fn step_of(event: &PipelineEvent) -> Option<&str> {
    match event {
        PipelineEvent::TaskCreated { step }
        | PipelineEvent::TaskDuplicate { step }
        | PipelineEvent::TaskPublished { step }
        | PipelineEvent::Claimed { step }
        | PipelineEvent::Skipped { step }
        | PipelineEvent::Succeeded { step, .. }
        | PipelineEvent::Retried { step, .. }
        | PipelineEvent::Failed { step, .. } => Some(step),
        PipelineEvent::ClaimContended
        | PipelineEvent::ClaimDeferred
        | PipelineEvent::LeaseRecovered
        | PipelineEvent::Rejected
        | PipelineEvent::Transient => None,
    }
}

/// Observer backed by the global `metrics` recorder.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsObserver;

impl MetricsObserver {
    pub fn new() -> Self {
        Self
    }
}

impl PipelineObserver for MetricsObserver {
    fn record(&self, event: &PipelineEvent) {
        let name = counter_name(event);
        match step_of(event) {
            Some(step) => counter!(name, "step" => step.to_string()).increment(1),
            None => counter!(name).increment(1),
        }

        if let PipelineEvent::Succeeded { step, elapsed } = event {
            histogram!(names::WORK_DURATION_SECONDS, "step" => step.clone())
                .record(elapsed.as_secs_f64());
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
