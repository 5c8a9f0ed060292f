//! PostgreSQL implementation.
//!
//! Claims and state transitions are single `UPDATE ... WHERE` statements;
//! the affected-row count is the whole answer, so there is no
//! read-then-write window between concurrent workers.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};

use mediaflow_models::{
    Media, MediaId, MediaStatus, NewTask, ProcessingTask, TaskId, TaskStatus,
};

use crate::config::DatabaseConfig;
use crate::error::{DbError, DbResult};
use crate::store::{effective_backoff, MediaStore, TaskStore};

const TASK_COLUMNS: &str = "id, media_id, step, status, retry_count, input_key, output_key, \
     lock_owner, lock_until, last_error, created_at, updated_at";

/// Task and media store backed by PostgreSQL.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect a pool with the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> DbResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await
            .map_err(|e| DbError::connection_failed(e.to_string()))?;

        info!("Connected to PostgreSQL (max_connections={})", config.max_connections);
        Ok(Self { pool })
    }

    /// Create from environment variables.
    pub async fn from_env() -> DbResult<Self> {
        Self::connect(&DatabaseConfig::from_env()).await
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply embedded schema migrations.
    pub async fn migrate(&self) -> DbResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn secs(d: Duration) -> f64 {
    d.as_secs_f64()
}

fn task_from_row(row: &PgRow) -> DbResult<ProcessingTask> {
    let status: String = row.try_get("status")?;
    let retry_count: i32 = row.try_get("retry_count")?;

    Ok(ProcessingTask {
        id: TaskId::from_string(row.try_get::<String, _>("id")?),
        media_id: MediaId::from_string(row.try_get::<String, _>("media_id")?),
        step: row.try_get("step")?,
        status: status
            .parse::<TaskStatus>()
            .map_err(|e| DbError::corrupt_row(e.to_string()))?,
        retry_count: u32::try_from(retry_count)
            .map_err(|_| DbError::corrupt_row(format!("negative retry_count {}", retry_count)))?,
        input_key: row.try_get("input_key")?,
        output_key: row.try_get("output_key")?,
        lock_owner: row.try_get("lock_owner")?,
        lock_until: row.try_get::<Option<DateTime<Utc>>, _>("lock_until")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn media_from_row(row: &PgRow) -> DbResult<Media> {
    let status: String = row.try_get("status")?;
    Ok(Media {
        id: MediaId::from_string(row.try_get::<String, _>("id")?),
        status: status
            .parse::<MediaStatus>()
            .map_err(|e| DbError::corrupt_row(e.to_string()))?,
        original_key: row.try_get("original_key")?,
        final_key: row.try_get("final_key")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl TaskStore for PgStore {
    async fn insert_task_if_absent(&self, task: &NewTask) -> DbResult<bool> {
        let result = sqlx::query(
            "INSERT INTO processing_task (id, media_id, step, status, input_key, output_key) \
             VALUES ($1, $2, $3, 'PENDING', $4, $5) \
             ON CONFLICT (media_id, step) DO NOTHING",
        )
        .bind(task.id.as_str())
        .bind(task.media_id.as_str())
        .bind(&task.step)
        .bind(&task.input_key)
        .bind(&task.output_key)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn withdraw_task(&self, id: &TaskId) -> DbResult<bool> {
        let result = sqlx::query(
            "DELETE FROM processing_task \
             WHERE id = $1 AND status = 'PENDING' AND lock_owner IS NULL",
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        let withdrawn = result.rows_affected() == 1;
        debug!(task_id = %id, withdrawn, "withdraw");
        Ok(withdrawn)
    }

    async fn get_task(&self, id: &TaskId) -> DbResult<Option<ProcessingTask>> {
        let query = format!("SELECT {} FROM processing_task WHERE id = $1", TASK_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(task_from_row).transpose()
    }

    async fn claim(&self, id: &TaskId, owner: &str, lease: Duration) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE processing_task \
             SET status = 'RUNNING', lock_owner = $2, \
                 lock_until = NOW() + make_interval(secs => $3), updated_at = NOW() \
             WHERE id = $1 \
               AND status IN ('PENDING', 'RETRY') \
               AND (lock_until IS NULL OR lock_until < NOW())",
        )
        .bind(id.as_str())
        .bind(owner)
        .bind(secs(lease))
        .execute(&self.pool)
        .await?;

        let claimed = result.rows_affected() == 1;
        debug!(task_id = %id, owner, claimed, "claim");
        Ok(claimed)
    }

    async fn release_expired_lease(&self, id: &TaskId) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE processing_task \
             SET status = 'RETRY', lock_owner = NULL, lock_until = NULL, updated_at = NOW() \
             WHERE id = $1 AND status = 'RUNNING' AND lock_until < NOW()",
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_succeeded(&self, id: &TaskId) -> DbResult<()> {
        sqlx::query(
            "UPDATE processing_task \
             SET status = 'SUCCEEDED', lock_owner = NULL, lock_until = NULL, updated_at = NOW() \
             WHERE id = $1 AND status NOT IN ('SUCCEEDED', 'FAILED')",
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: &TaskId, attempt: u32, error: &str) -> DbResult<()> {
        sqlx::query(
            "UPDATE processing_task \
             SET status = 'FAILED', retry_count = GREATEST(retry_count, $2), last_error = $3, \
                 lock_owner = NULL, lock_until = NULL, updated_at = NOW() \
             WHERE id = $1 AND status NOT IN ('SUCCEEDED', 'FAILED')",
        )
        .bind(id.as_str())
        .bind(attempt as i32)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_retry(
        &self,
        id: &TaskId,
        attempt: u32,
        error: &str,
        backoff: Duration,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE processing_task \
             SET status = 'RETRY', retry_count = GREATEST(retry_count, $2), last_error = $3, \
                 lock_owner = NULL, lock_until = NOW() + make_interval(secs => $4), \
                 updated_at = NOW() \
             WHERE id = $1 AND status NOT IN ('SUCCEEDED', 'FAILED')",
        )
        .bind(id.as_str())
        .bind(attempt as i32)
        .bind(error)
        .bind(secs(effective_backoff(backoff)))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn ping(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl MediaStore for PgStore {
    async fn insert_media(&self, media: &Media) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO media (id, status, original_key, final_key, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(media.id.as_str())
        .bind(media.status.as_str())
        .bind(&media.original_key)
        .bind(&media.final_key)
        .bind(media.created_at)
        .bind(media.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_media(&self, id: &MediaId) -> DbResult<Option<Media>> {
        let row = sqlx::query(
            "SELECT id, status, original_key, final_key, created_at, updated_at \
             FROM media WHERE id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(media_from_row).transpose()
    }

    async fn update_media_status(&self, id: &MediaId, status: MediaStatus) -> DbResult<bool> {
        let result = sqlx::query("UPDATE media SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id.as_str())
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete_media(&self, id: &MediaId, final_key: &str) -> DbResult<()> {
        sqlx::query(
            "UPDATE media SET status = 'DONE', final_key = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id.as_str())
        .bind(final_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail_media(&self, id: &MediaId) -> DbResult<()> {
        sqlx::query(
            "UPDATE media SET status = 'FAILED', updated_at = NOW() \
             WHERE id = $1 AND status <> 'DONE'",
        )
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
