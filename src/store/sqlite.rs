/*!
SQLite-backed [`TaskStore`] and [`JobQueue`].

## Behavior

- Uses the serde persistence models (see [`super::persistence`]) for
  row encoding; step and status identities are stored as their stable
  string forms so rows stay greppable.
- Every mutation runs inside one transaction, which is what the
  pipeline's write protocol leans on: a step entry, a composite step
  completion, a batch flush, and a terminal transition are each atomic.
- When the `sqlite-migrations` feature is enabled (default), embedded
  migrations (`sqlx::migrate!("./migrations")`) run on connect;
  disabling the feature assumes external migration orchestration.

## Database Schema

- `tasks` ← one row per task, status and step as strings
- `step_log` ← append-only started/completed/failed entries
- `checkpoints` ← one live checkpoint per task, replaced per step
- `roadmaps` ← the denormalized framework document
- `artifacts` ← generated content, keyed `(concept_id, content_type)`
- `jobs` ← the background queue (`ready` / `in_flight`)
*/

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tracing::instrument;

use crate::model::{
    CurriculumFramework, ExecutionSummary, Task, TaskStatus, TaskStatusView,
};
use crate::pipeline::StepDelta;
use crate::steps::StepKind;
use crate::worker::{ContentJob, Delivery, JobQueue, QueueError};

use super::persistence::{
    PersistedCheckpoint, PersistedTask, PersistenceError, from_json_str, to_json_string,
};
use super::{ArtifactRow, StepCheckpoint, StoreError, TaskStore};

/// Durable store over a shared SQLite pool.
#[derive(Clone)]
pub struct SqliteTaskStore {
    pool: Arc<SqlitePool>,
}

impl std::fmt::Debug for SqliteTaskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteTaskStore").finish()
    }
}

impl SqliteTaskStore {
    /// Connect (or create) a SQLite database at `database_url`.
    /// Example URL: `sqlite://courseforge.db?mode=rwc`.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(database_url).await?;
        #[cfg(feature = "sqlite-migrations")]
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Share the pool, e.g. with a [`SqliteJobQueue`].
    pub fn pool(&self) -> Arc<SqlitePool> {
        self.pool.clone()
    }

    fn task_from_row(row: &SqliteRow) -> Result<Task, StoreError> {
        let summary_json: String = row.get("summary_json");
        let persisted = PersistedTask {
            id: row.get("id"),
            owner: row.get("owner"),
            status: row.get("status"),
            current_step: row.get("current_step"),
            branch_source: row.get("branch_source"),
            roadmap_id: row.get("roadmap_id"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            summary: serde_json::from_str(&summary_json)?,
        };
        Ok(Task::try_from(persisted)?)
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create_task(&self, task: &Task) -> Result<(), StoreError> {
        let p = PersistedTask::from(task);
        sqlx::query(
            r#"
            INSERT INTO tasks (
                id, owner, status, current_step, branch_source,
                roadmap_id, summary_json, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&p.id)
        .bind(&p.owner)
        .bind(&p.status)
        .bind(&p.current_step)
        .bind(&p.branch_source)
        .bind(&p.roadmap_id)
        .bind(serde_json::to_string(&p.summary)?)
        .bind(&p.created_at)
        .bind(&p.updated_at)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    async fn load_task(&self, task_id: &str) -> Result<Task, StoreError> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?1")
            .bind(task_id)
            .fetch_optional(&*self.pool)
            .await?
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;
        Self::task_from_row(&row)
    }

    async fn status(&self, task_id: &str) -> Result<TaskStatusView, StoreError> {
        Ok(self.load_task(task_id).await?.status_view())
    }

    #[instrument(skip(self, task), fields(task_id = %task.id, step = %task.current_step), err)]
    async fn begin_step(&self, task: &Task) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM tasks WHERE id = ?1")
                .bind(&task.id)
                .fetch_optional(&mut *tx)
                .await?;
        let current = current.ok_or_else(|| StoreError::TaskNotFound(task.id.clone()))?;
        let status = TaskStatus::parse(&current)
            .ok_or_else(|| PersistenceError::UnknownStatus(current.clone()))?;
        if status.is_terminal() {
            return Err(StoreError::AlreadyTerminal {
                task_id: task.id.clone(),
                status,
            });
        }

        let p = PersistedTask::from(task);
        sqlx::query(
            r#"
            UPDATE tasks
            SET status = ?2, current_step = ?3, branch_source = ?4,
                roadmap_id = ?5, updated_at = ?6
            WHERE id = ?1
            "#,
        )
        .bind(&p.id)
        .bind(&p.status)
        .bind(&p.current_step)
        .bind(&p.branch_source)
        .bind(&p.roadmap_id)
        .bind(&p.updated_at)
        .execute(&mut *tx)
        .await?;
        sqlx::query("INSERT INTO step_log (task_id, step, phase) VALUES (?1, ?2, 'started')")
            .bind(&p.id)
            .bind(&p.current_step)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, task, delta), fields(task_id = %task.id, step = %task.current_step), err)]
    async fn complete_step(&self, task: &Task, delta: &StepDelta) -> Result<(), StoreError> {
        let p = PersistedTask::from(task);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE tasks
            SET status = ?2, current_step = ?3, branch_source = ?4,
                roadmap_id = ?5, summary_json = ?6, updated_at = ?7
            WHERE id = ?1
            "#,
        )
        .bind(&p.id)
        .bind(&p.status)
        .bind(&p.current_step)
        .bind(&p.branch_source)
        .bind(&p.roadmap_id)
        .bind(serde_json::to_string(&p.summary)?)
        .bind(&p.updated_at)
        .execute(&mut *tx)
        .await?;

        if let Some(framework) = &delta.framework {
            sqlx::query(
                r#"
                INSERT INTO roadmaps (roadmap_id, framework_json)
                VALUES (?1, ?2)
                ON CONFLICT(roadmap_id) DO UPDATE SET
                    framework_json = excluded.framework_json,
                    updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                "#,
            )
            .bind(&framework.roadmap_id)
            .bind(serde_json::to_string(framework)?)
            .execute(&mut *tx)
            .await?;
        }

        let detail = step_detail(delta);
        sqlx::query(
            "INSERT INTO step_log (task_id, step, phase, detail) VALUES (?1, ?2, 'completed', ?3)",
        )
        .bind(&p.id)
        .bind(&p.current_step)
        .bind(detail)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, reason), fields(task_id, step = %step), err)]
    async fn fail_step(
        &self,
        task_id: &str,
        step: StepKind,
        reason: &str,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let updated = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'failed', current_step = 'Done',
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
            WHERE id = ?1
            "#,
        )
        .bind(task_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(StoreError::TaskNotFound(task_id.to_string()));
        }
        sqlx::query(
            "INSERT INTO step_log (task_id, step, phase, detail) VALUES (?1, ?2, 'failed', ?3)",
        )
        .bind(task_id)
        .bind(step.encode())
        .bind(reason)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn save_checkpoint(&self, checkpoint: &StepCheckpoint) -> Result<(), StoreError> {
        let p = PersistedCheckpoint::from(checkpoint);
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO checkpoints (task_id, step, state_json, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&p.task_id)
        .bind(&p.step)
        .bind(to_json_string(&p.state)?)
        .bind(&p.created_at)
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    async fn load_checkpoint(&self, task_id: &str) -> Result<Option<StepCheckpoint>, StoreError> {
        let row = sqlx::query(
            "SELECT step, state_json, created_at FROM checkpoints WHERE task_id = ?1",
        )
        .bind(task_id)
        .fetch_optional(&*self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let state_json: String = row.get("state_json");
        let persisted = PersistedCheckpoint {
            task_id: task_id.to_string(),
            step: row.get("step"),
            state: from_json_str(&state_json)?,
            created_at: row.get("created_at"),
        };
        Ok(Some(StepCheckpoint::try_from(persisted)?))
    }

    async fn load_framework(&self, roadmap_id: &str) -> Result<CurriculumFramework, StoreError> {
        let json: Option<String> =
            sqlx::query_scalar("SELECT framework_json FROM roadmaps WHERE roadmap_id = ?1")
                .bind(roadmap_id)
                .fetch_optional(&*self.pool)
                .await?;
        let json = json.ok_or_else(|| StoreError::RoadmapNotFound(roadmap_id.to_string()))?;
        Ok(serde_json::from_str(&json)?)
    }

    #[instrument(skip(self, batch, framework), fields(task_id, rows = batch.len()), err)]
    async fn flush_content_batch(
        &self,
        task_id: &str,
        roadmap_id: &str,
        batch: &[ArtifactRow],
        framework: &CurriculumFramework,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for row in batch {
            sqlx::query(
                r#"
                INSERT INTO artifacts (
                    concept_id, content_type, artifact_id, version, body_json, task_id
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(concept_id, content_type) DO UPDATE SET
                    artifact_id = excluded.artifact_id,
                    version = excluded.version,
                    body_json = excluded.body_json,
                    updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                "#,
            )
            .bind(&row.concept_id)
            .bind(row.content_type.as_str())
            .bind(&row.artifact_id)
            .bind(row.version as i64)
            .bind(serde_json::to_string(&row.body)?)
            .bind(task_id)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query(
            r#"
            INSERT INTO roadmaps (roadmap_id, framework_json)
            VALUES (?1, ?2)
            ON CONFLICT(roadmap_id) DO UPDATE SET
                framework_json = excluded.framework_json,
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
            "#,
        )
        .bind(roadmap_id)
        .bind(serde_json::to_string(framework)?)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, summary), fields(task_id, status = %status), err)]
    async fn finalize_task(
        &self,
        task_id: &str,
        status: TaskStatus,
        summary: &ExecutionSummary,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM tasks WHERE id = ?1")
                .bind(task_id)
                .fetch_optional(&mut *tx)
                .await?;
        let current = current.ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;
        if TaskStatus::parse(&current).is_some_and(|s| s.is_terminal()) {
            // Redelivered job finished twice; the first terminal write wins.
            return Ok(());
        }
        sqlx::query(
            r#"
            UPDATE tasks
            SET status = ?2, current_step = 'Done', summary_json = ?3,
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
            WHERE id = ?1
            "#,
        )
        .bind(task_id)
        .bind(status.as_str())
        .bind(serde_json::to_string(summary)?)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Which delta fields the completed step produced, for the step log.
fn step_detail(delta: &StepDelta) -> Option<String> {
    let mut produced = Vec::new();
    if delta.intent.is_some() {
        produced.push("intent");
    }
    if delta.framework.is_some() {
        produced.push("framework");
    }
    if delta.validation.is_some() {
        produced.push("validation");
    }
    if delta.edit_plan.is_some() {
        produced.push("edit_plan");
    }
    if delta.review.is_some() {
        produced.push("review");
    }
    if delta.dispatch.is_some() {
        produced.push("dispatch");
    }
    if produced.is_empty() {
        None
    } else {
        Some(produced.join(","))
    }
}

/// Queue backend sharing the store's pool, so a dispatch enqueue can be
/// co-located with the task database.
#[derive(Clone)]
pub struct SqliteJobQueue {
    pool: Arc<SqlitePool>,
}

impl SqliteJobQueue {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Move every in-flight delivery back to ready, for recovery after
    /// a consumer crash.
    pub async fn requeue_in_flight(&self) -> Result<u64, QueueError> {
        let updated = sqlx::query("UPDATE jobs SET state = 'ready' WHERE state = 'in_flight'")
            .execute(&*self.pool)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        Ok(updated.rows_affected())
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn enqueue(&self, job: ContentJob) -> Result<(), QueueError> {
        let payload =
            serde_json::to_string(&job).map_err(|e| QueueError::Backend(e.to_string()))?;
        sqlx::query(
            "INSERT INTO jobs (delivery_id, task_id, payload_json) VALUES (?1, ?2, ?3)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&job.task_id)
        .bind(payload)
        .execute(&*self.pool)
        .await
        .map_err(|e| QueueError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Delivery>, QueueError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        let row = sqlx::query(
            r#"
            SELECT delivery_id, payload_json FROM jobs
            WHERE state = 'ready'
            ORDER BY created_at, delivery_id
            LIMIT 1
            "#,
        )
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| QueueError::Backend(e.to_string()))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let delivery_id: String = row.get("delivery_id");
        let payload: String = row.get("payload_json");
        let job: ContentJob =
            serde_json::from_str(&payload).map_err(|e| QueueError::Backend(e.to_string()))?;
        sqlx::query("UPDATE jobs SET state = 'in_flight' WHERE delivery_id = ?1")
            .bind(&delivery_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        tx.commit()
            .await
            .map_err(|e| QueueError::Backend(e.to_string()))?;
        Ok(Some(Delivery { delivery_id, job }))
    }

    async fn ack(&self, delivery_id: &str) -> Result<(), QueueError> {
        let deleted =
            sqlx::query("DELETE FROM jobs WHERE delivery_id = ?1 AND state = 'in_flight'")
                .bind(delivery_id)
                .execute(&*self.pool)
                .await
                .map_err(|e| QueueError::Backend(e.to_string()))?;
        if deleted.rows_affected() == 0 {
            return Err(QueueError::UnknownDelivery(delivery_id.to_string()));
        }
        Ok(())
    }
}
