//! Store ports.

use std::time::Duration;

use async_trait::async_trait;
use mediaflow_models::{Media, MediaId, MediaStatus, NewTask, ProcessingTask, TaskId};

use crate::error::DbResult;

/// Backoff applied when a caller passes a zero window.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Durable record of processing tasks.
///
/// Every method is a single atomic statement from the caller's point of
/// view. Ownership is granted only by [`TaskStore::claim`]; the `mark_*`
/// writes set final-state values and never touch a task that is already
/// SUCCEEDED or FAILED.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert unless a row for the same (media, step) exists.
    ///
    /// Returns `true` only if this call inserted the row.
    async fn insert_task_if_absent(&self, task: &NewTask) -> DbResult<bool>;

    /// Delete a task that was inserted but never handed out: PENDING with no
    /// owner. Returns `true` only if this call removed the row, after which
    /// the (media, step) pair can be inserted again.
    async fn withdraw_task(&self, id: &TaskId) -> DbResult<bool>;

    /// Load a task by id.
    async fn get_task(&self, id: &TaskId) -> DbResult<Option<ProcessingTask>>;

    /// Move the task to RUNNING under `owner` for `lease` if and only if its
    /// status is PENDING or RETRY and no lease is live.
    async fn claim(&self, id: &TaskId, owner: &str, lease: Duration) -> DbResult<bool>;

    /// Return a RUNNING task whose lease has expired to RETRY with lock
    /// fields cleared, leaving `retry_count` alone. Returns `true` only if
    /// this call moved the row.
    async fn release_expired_lease(&self, id: &TaskId) -> DbResult<bool>;

    /// SUCCEEDED, lock fields cleared.
    async fn mark_succeeded(&self, id: &TaskId) -> DbResult<()>;

    /// FAILED, lock fields cleared, `retry_count` raised to at least `attempt`.
    async fn mark_failed(&self, id: &TaskId, attempt: u32, error: &str) -> DbResult<()>;

    /// RETRY with a forward-dated lease of `backoff` and no owner,
    /// `retry_count` raised to at least `attempt`.
    async fn mark_retry(
        &self,
        id: &TaskId,
        attempt: u32,
        error: &str,
        backoff: Duration,
    ) -> DbResult<()>;

    /// Connectivity probe.
    async fn ping(&self) -> DbResult<()>;
}

/// Media bookkeeping used by the creation path and pipeline completion.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn insert_media(&self, media: &Media) -> DbResult<()>;

    async fn get_media(&self, id: &MediaId) -> DbResult<Option<Media>>;

    /// Returns `false` when no such media exists.
    async fn update_media_status(&self, id: &MediaId, status: MediaStatus) -> DbResult<bool>;

    /// DONE with the final artifact key.
    async fn complete_media(&self, id: &MediaId, final_key: &str) -> DbResult<()>;

    async fn fail_media(&self, id: &MediaId) -> DbResult<()>;
}

pub(crate) fn effective_backoff(backoff: Duration) -> Duration {
    if backoff.is_zero() {
        DEFAULT_RETRY_BACKOFF
    } else {
        backoff
    }
}
