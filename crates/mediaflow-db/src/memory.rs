//! In-memory store.
//!
//! Same conditional semantics as the PostgreSQL store, each operation
//! applied under one lock. Time comes from an injected [`Clock`] so lease
//! windows can be crossed deterministically.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use mediaflow_models::{
    Clock, Media, MediaId, MediaStatus, NewTask, ProcessingTask, SystemClock, TaskId, TaskStatus,
};

use crate::error::{DbError, DbResult};
use crate::store::{effective_backoff, MediaStore, TaskStore};

#[derive(Default)]
struct State {
    tasks: HashMap<TaskId, ProcessingTask>,
    by_pair: HashMap<(MediaId, String), TaskId>,
    media: HashMap<MediaId, Media>,
}

/// Task and media store held in process memory.
pub struct InMemoryStore {
    state: Mutex<State>,
    clock: Arc<dyn Clock>,
    unavailable: AtomicBool,
    mutations: AtomicU64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
            unavailable: AtomicBool::new(false),
            mutations: AtomicU64::new(0),
        }
    }

    /// Make every subsequent call fail with [`DbError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of writes that changed a row.
    pub fn mutations(&self) -> u64 {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Overwrite a task row as-is. Test setup only.
    pub fn put_task(&self, task: ProcessingTask) {
        let mut state = self.lock();
        state
            .by_pair
            .insert((task.media_id.clone(), task.step.clone()), task.id.clone());
        state.tasks.insert(task.id.clone(), task);
    }

    /// Every task for a media item, in no particular order.
    pub fn tasks_for_media(&self, media_id: &MediaId) -> Vec<ProcessingTask> {
        self.lock()
            .tasks
            .values()
            .filter(|t| &t.media_id == media_id)
            .cloned()
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self) -> DbResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DbError::Unavailable("in-memory store switched off".to_string()));
        }
        Ok(())
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn bump(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }

    /// Apply `f` to a non-terminal task; terminal or missing rows are left alone.
    fn update_live(&self, id: &TaskId, f: impl FnOnce(&mut ProcessingTask, DateTime<Utc>)) {
        let now = self.now();
        let mut state = self.lock();
        if let Some(task) = state.tasks.get_mut(id) {
            if !task.status.is_terminal() {
                f(task, now);
                task.updated_at = now;
                self.bump();
            }
        }
    }
}

fn lease_end(now: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn insert_task_if_absent(&self, task: &NewTask) -> DbResult<bool> {
        self.check()?;
        let now = self.now();
        let mut state = self.lock();
        let pair = (task.media_id.clone(), task.step.clone());
        if state.by_pair.contains_key(&pair) || state.tasks.contains_key(&task.id) {
            return Ok(false);
        }
        state.by_pair.insert(pair, task.id.clone());
        state
            .tasks
            .insert(task.id.clone(), task.clone().into_record(now));
        self.bump();
        Ok(true)
    }

    async fn withdraw_task(&self, id: &TaskId) -> DbResult<bool> {
        self.check()?;
        let mut state = self.lock();
        let withdrawable = state
            .tasks
            .get(id)
            .is_some_and(|t| t.status == TaskStatus::Pending && t.lock_owner.is_none());
        if !withdrawable {
            return Ok(false);
        }
        if let Some(task) = state.tasks.remove(id) {
            state.by_pair.remove(&(task.media_id, task.step));
        }
        self.bump();
        Ok(true)
    }

    async fn get_task(&self, id: &TaskId) -> DbResult<Option<ProcessingTask>> {
        self.check()?;
        Ok(self.lock().tasks.get(id).cloned())
    }

    async fn claim(&self, id: &TaskId, owner: &str, lease: Duration) -> DbResult<bool> {
        self.check()?;
        let now = self.now();
        let mut state = self.lock();
        let Some(task) = state.tasks.get_mut(id) else {
            return Ok(false);
        };
        if !task.is_claimable_at(now) {
            return Ok(false);
        }
        task.status = TaskStatus::Running;
        task.lock_owner = Some(owner.to_string());
        task.lock_until = Some(lease_end(now, lease));
        task.updated_at = now;
        self.bump();
        Ok(true)
    }

    async fn release_expired_lease(&self, id: &TaskId) -> DbResult<bool> {
        self.check()?;
        let now = self.now();
        let mut state = self.lock();
        let Some(task) = state.tasks.get_mut(id) else {
            return Ok(false);
        };
        if task.status != TaskStatus::Running || task.is_leased_at(now) {
            return Ok(false);
        }
        task.status = TaskStatus::Retry;
        task.lock_owner = None;
        task.lock_until = None;
        task.updated_at = now;
        self.bump();
        Ok(true)
    }

    async fn mark_succeeded(&self, id: &TaskId) -> DbResult<()> {
        self.check()?;
        self.update_live(id, |task, _| {
            task.status = TaskStatus::Succeeded;
            task.lock_owner = None;
            task.lock_until = None;
        });
        Ok(())
    }

    async fn mark_failed(&self, id: &TaskId, attempt: u32, error: &str) -> DbResult<()> {
        self.check()?;
        self.update_live(id, |task, _| {
            task.status = TaskStatus::Failed;
            task.retry_count = task.retry_count.max(attempt);
            task.last_error = Some(error.to_string());
            task.lock_owner = None;
            task.lock_until = None;
        });
        Ok(())
    }

    async fn mark_retry(
        &self,
        id: &TaskId,
        attempt: u32,
        error: &str,
        backoff: Duration,
    ) -> DbResult<()> {
        self.check()?;
        let backoff = effective_backoff(backoff);
        self.update_live(id, |task, now| {
            task.status = TaskStatus::Retry;
            task.retry_count = task.retry_count.max(attempt);
            task.last_error = Some(error.to_string());
            task.lock_owner = None;
            task.lock_until = Some(lease_end(now, backoff));
        });
        Ok(())
    }

    async fn ping(&self) -> DbResult<()> {
        self.check()
    }
}

#[async_trait]
impl MediaStore for InMemoryStore {
    async fn insert_media(&self, media: &Media) -> DbResult<()> {
        self.check()?;
        self.lock().media.insert(media.id.clone(), media.clone());
        self.bump();
        Ok(())
    }

    async fn get_media(&self, id: &MediaId) -> DbResult<Option<Media>> {
        self.check()?;
        Ok(self.lock().media.get(id).cloned())
    }

    async fn update_media_status(&self, id: &MediaId, status: MediaStatus) -> DbResult<bool> {
        self.check()?;
        let now = self.now();
        let mut state = self.lock();
        match state.media.get_mut(id) {
            Some(media) => {
                media.status = status;
                media.updated_at = now;
                self.bump();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn complete_media(&self, id: &MediaId, final_key: &str) -> DbResult<()> {
        self.check()?;
        let now = self.now();
        if let Some(media) = self.lock().media.get_mut(id) {
            media.status = MediaStatus::Done;
            media.final_key = Some(final_key.to_string());
            media.updated_at = now;
            self.bump();
        }
        Ok(())
    }

    async fn fail_media(&self, id: &MediaId) -> DbResult<()> {
        self.check()?;
        let now = self.now();
        if let Some(media) = self.lock().media.get_mut(id) {
            if media.status != MediaStatus::Done {
                media.status = MediaStatus::Failed;
                media.updated_at = now;
                self.bump();
            }
        }
        Ok(())
    }
}
