//! Pipeline outcome reporting.
//!
//! Components emit [`PipelineEvent`]s to an injected [`PipelineObserver`];
//! translating them into counters is the observer's business.

use std::sync::Mutex;
use std::time::Duration;

/// Structured outcome emitted by the dispatch path and the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// A task row was inserted
    TaskCreated { step: String },
    /// Creation found an existing (media, step) row
    TaskDuplicate { step: String },
    /// A pointer was published to the transport
    TaskPublished { step: String },
    /// This worker won the lease
    Claimed { step: String },
    /// Claim lost to another owner or to a terminal state
    ClaimContended,
    /// Claim refused because the backoff lease is still running
    ClaimDeferred,
    /// A crashed owner's expired lease was released for reclaim
    LeaseRecovered,
    /// Output already existed, work unit not invoked
    Skipped { step: String },
    /// Work unit ran and the task succeeded
    Succeeded { step: String, elapsed: Duration },
    /// Recoverable failure with budget left
    Retried { step: String, attempt: u32 },
    /// Terminal failure, message dead-lettered
    Failed { step: String, attempt: u32 },
    /// Delivery body was not a valid pointer
    Rejected,
    /// Infrastructure failure before ownership was established
    Transient,
}

impl PipelineEvent {
    /// Short label used for counters and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::TaskCreated { .. } => "created",
            PipelineEvent::TaskDuplicate { .. } => "duplicate",
            PipelineEvent::TaskPublished { .. } => "published",
            PipelineEvent::Claimed { .. } => "claimed",
            PipelineEvent::ClaimContended => "contended",
            PipelineEvent::ClaimDeferred => "deferred",
            PipelineEvent::LeaseRecovered => "recovered",
            PipelineEvent::Skipped { .. } => "skipped",
            PipelineEvent::Succeeded { .. } => "processed",
            PipelineEvent::Retried { .. } => "retried",
            PipelineEvent::Failed { .. } => "failed",
            PipelineEvent::Rejected => "rejected",
            PipelineEvent::Transient => "transient",
        }
    }
}

/// Receives pipeline outcomes.
pub trait PipelineObserver: Send + Sync {
    fn record(&self, event: &PipelineEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {
    fn record(&self, _event: &PipelineEvent) {}
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of recorded events with the given [`PipelineEvent::kind`].
    pub fn count(&self, kind: &str) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| e.kind() == kind)
            .count()
    }
}

impl PipelineObserver for RecordingObserver {
    fn record(&self, event: &PipelineEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}
