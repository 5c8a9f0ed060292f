//! Routing for deliveries whose claim was refused.

use std::time::Duration;

use chrono::{DateTime, Utc};
use mediaflow_models::{ProcessingTask, TaskStatus};

/// How to settle a delivery whose claim failed, from one read of the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimRoute {
    /// Someone else owns it or it is resolved: ack as a no-op
    Contended,
    /// Eligible but the lease or backoff window is still running: requeue,
    /// optionally holding the message back for `wait`
    Deferred { wait: Option<Duration> },
    /// RUNNING with a lease that has run out: owner presumed dead
    Abandoned,
    /// No such task: ack
    Missing,
}

/// Classify a refused claim given the current row at `now`.
pub fn route_claim_failure(task: Option<&ProcessingTask>, now: DateTime<Utc>) -> ClaimRoute {
    let Some(task) = task else {
        return ClaimRoute::Missing;
    };

    match task.status {
        TaskStatus::Succeeded | TaskStatus::Failed => ClaimRoute::Contended,
        TaskStatus::Running if task.is_leased_at(now) => ClaimRoute::Contended,
        TaskStatus::Running => ClaimRoute::Abandoned,
        TaskStatus::Pending | TaskStatus::Retry => ClaimRoute::Deferred {
            wait: task
                .lock_until
                .and_then(|until| (until - now).to_std().ok())
                .filter(|d| !d.is_zero()),
        },
    }
}
