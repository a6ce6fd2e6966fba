//! Task persistence.
//!
//! [`TaskStore`] is the single seam between the pipeline and durable
//! storage. Two backends ship: [`InMemoryTaskStore`] for tests and
//! ephemeral runs, and `SqliteTaskStore` behind the `sqlite` feature.
//!
//! The store owns the transactional invariants the pipeline relies on:
//!
//! - `complete_step` persists the step's whole composite write (task
//!   row, produced data, step log entry) in one transaction.
//! - `fail_step` and `finalize_task` are the only writers of a terminal
//!   status, and both set `current_step = Done` in the same
//!   transaction, so `Done` is never observable with a live status.
//! - `flush_content_batch` upserts artifact rows keyed by
//!   `(concept_id, content_type)`, making duplicate job delivery
//!   converge instead of duplicating content.

pub mod memory;
pub mod persistence;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

use crate::model::{
    ContentKind, CurriculumFramework, ExecutionSummary, Task, TaskStatus, TaskStatusView,
};
use crate::pipeline::StepDelta;
use crate::state::TaskState;
use crate::steps::StepKind;

pub use memory::InMemoryTaskStore;
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteJobQueue, SqliteTaskStore};

/// Errors surfaced by a storage backend.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("task not found: {0}")]
    #[diagnostic(code(courseforge::store::task_not_found))]
    TaskNotFound(String),

    #[error("roadmap not found: {0}")]
    #[diagnostic(code(courseforge::store::roadmap_not_found))]
    RoadmapNotFound(String),

    #[error("task {task_id} is already terminal ({status})")]
    #[diagnostic(
        code(courseforge::store::already_terminal),
        help("Terminal tasks are immutable; start a new task instead.")
    )]
    AlreadyTerminal { task_id: String, status: TaskStatus },

    #[error("serialization error: {0}")]
    #[diagnostic(code(courseforge::store::serde))]
    Serde(#[from] serde_json::Error),

    /// A stored row holds an encoding this version cannot decode.
    #[error("corrupt row: {0}")]
    #[diagnostic(code(courseforge::store::corrupt))]
    Corrupt(#[from] persistence::PersistenceError),

    #[cfg(feature = "sqlite")]
    #[error("database error: {0}")]
    #[diagnostic(code(courseforge::store::database))]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "sqlite-migrations")]
    #[error("migration error: {0}")]
    #[diagnostic(code(courseforge::store::migration))]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Durable snapshot of the working state after a completed step.
///
/// Resume loads the latest checkpoint and routes from
/// `step` as the last completed step.
#[derive(Clone, Debug, PartialEq)]
pub struct StepCheckpoint {
    pub task_id: String,
    /// Last step that completed.
    pub step: StepKind,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
}

impl StepCheckpoint {
    pub fn new(task_id: impl Into<String>, step: StepKind, state: TaskState) -> Self {
        Self {
            task_id: task_id.into(),
            step,
            state,
            created_at: Utc::now(),
        }
    }
}

/// One generated artifact ready for persistence.
#[derive(Clone, Debug, PartialEq)]
pub struct ArtifactRow {
    pub concept_id: String,
    pub content_type: ContentKind,
    pub artifact_id: String,
    pub version: u32,
    pub body: Value,
}

/// Storage backend for tasks, checkpoints, frameworks and artifacts.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, task: &Task) -> Result<(), StoreError>;

    async fn load_task(&self, task_id: &str) -> Result<Task, StoreError>;

    /// Read-only status projection for polling clients.
    async fn status(&self, task_id: &str) -> Result<TaskStatusView, StoreError>;

    /// Transition the task into a step: writes `current_step`, the
    /// in-flight status and `branch_source` in one transaction.
    /// Rejects terminal tasks.
    async fn begin_step(&self, task: &Task) -> Result<(), StoreError>;

    /// Persist a completed step: the task row update plus every field
    /// set on the delta (framework snapshot, validation record, edit
    /// plan, review decision) as one composite write.
    async fn complete_step(&self, task: &Task, delta: &StepDelta) -> Result<(), StoreError>;

    /// Mark the task failed. Writes `status` and `current_step = Done`
    /// together; partial data from earlier steps is left intact.
    async fn fail_step(
        &self,
        task_id: &str,
        step: StepKind,
        reason: &str,
    ) -> Result<(), StoreError>;

    async fn save_checkpoint(&self, checkpoint: &StepCheckpoint) -> Result<(), StoreError>;

    /// Latest checkpoint for the task, if any.
    async fn load_checkpoint(&self, task_id: &str) -> Result<Option<StepCheckpoint>, StoreError>;

    async fn load_framework(&self, roadmap_id: &str) -> Result<CurriculumFramework, StoreError>;

    /// One incremental batch from the worker pool: upsert the artifact
    /// rows and overwrite the framework snapshot, atomically.
    async fn flush_content_batch(
        &self,
        task_id: &str,
        roadmap_id: &str,
        batch: &[ArtifactRow],
        framework: &CurriculumFramework,
    ) -> Result<(), StoreError>;

    /// Terminal transition after the background phase: writes the
    /// terminal status, `current_step = Done` and the execution summary
    /// in one transaction.
    async fn finalize_task(
        &self,
        task_id: &str,
        status: TaskStatus,
        summary: &ExecutionSummary,
    ) -> Result<(), StoreError>;
}
