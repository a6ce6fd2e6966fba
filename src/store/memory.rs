//! Map-backed [`TaskStore`] for tests and ephemeral runs.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::model::{
    ContentKind, CurriculumFramework, ExecutionSummary, Task, TaskStatus, TaskStatusView,
};
use crate::pipeline::StepDelta;
use crate::steps::StepKind;

use super::{ArtifactRow, StepCheckpoint, StoreError, TaskStore};

/// One entry of the append-only step log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepLogEntry {
    pub task_id: String,
    pub step: String,
    /// `"started"`, `"completed"`, or `"failed"`.
    pub phase: &'static str,
}

#[derive(Default)]
struct Inner {
    tasks: FxHashMap<String, Task>,
    checkpoints: FxHashMap<String, StepCheckpoint>,
    frameworks: FxHashMap<String, CurriculumFramework>,
    artifacts: FxHashMap<(String, ContentKind), ArtifactRow>,
    step_log: Vec<StepLogEntry>,
    /// Row counts of every content-batch flush, in arrival order.
    flush_sizes: Vec<usize>,
}

/// In-process store. Every method takes the single lock briefly, which
/// stands in for the per-call transaction of the SQLite backend.
#[derive(Clone, Default)]
pub struct InMemoryTaskStore {
    inner: Arc<Mutex<Inner>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Step log so far, for assertions on bracket ordering.
    pub fn step_log(&self) -> Vec<StepLogEntry> {
        self.inner.lock().step_log.clone()
    }

    /// Row counts of the content-batch flushes observed so far.
    pub fn flush_sizes(&self) -> Vec<usize> {
        self.inner.lock().flush_sizes.clone()
    }

    /// Persisted artifact for one slot, if flushed.
    pub fn artifact(&self, concept_id: &str, kind: ContentKind) -> Option<ArtifactRow> {
        self.inner
            .lock()
            .artifacts
            .get(&(concept_id.to_string(), kind))
            .cloned()
    }

    pub fn artifact_count(&self) -> usize {
        self.inner.lock().artifacts.len()
    }

    /// Seed a framework directly, for worker tests that start past the
    /// design step.
    pub fn put_framework(&self, framework: CurriculumFramework) {
        self.inner
            .lock()
            .frameworks
            .insert(framework.roadmap_id.clone(), framework);
    }
}

impl Inner {
    fn task_mut(&mut self, task_id: &str) -> Result<&mut Task, StoreError> {
        self.tasks
            .get_mut(task_id)
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(&self, task: &Task) -> Result<(), StoreError> {
        self.inner.lock().tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn load_task(&self, task_id: &str) -> Result<Task, StoreError> {
        self.inner
            .lock()
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))
    }

    async fn status(&self, task_id: &str) -> Result<TaskStatusView, StoreError> {
        Ok(self.load_task(task_id).await?.status_view())
    }

    async fn begin_step(&self, task: &Task) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let stored = inner.task_mut(&task.id)?;
        if stored.status.is_terminal() {
            return Err(StoreError::AlreadyTerminal {
                task_id: task.id.clone(),
                status: stored.status,
            });
        }
        *stored = task.clone();
        inner.step_log.push(StepLogEntry {
            task_id: task.id.clone(),
            step: task.current_step.encode(),
            phase: "started",
        });
        Ok(())
    }

    async fn complete_step(&self, task: &Task, delta: &StepDelta) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let stored = inner.task_mut(&task.id)?;
        *stored = task.clone();
        if let Some(framework) = &delta.framework {
            inner
                .frameworks
                .insert(framework.roadmap_id.clone(), framework.clone());
        }
        inner.step_log.push(StepLogEntry {
            task_id: task.id.clone(),
            step: task.current_step.encode(),
            phase: "completed",
        });
        Ok(())
    }

    async fn fail_step(
        &self,
        task_id: &str,
        step: StepKind,
        _reason: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let stored = inner.task_mut(task_id)?;
        stored.status = TaskStatus::Failed;
        stored.current_step = StepKind::Done;
        stored.updated_at = chrono::Utc::now();
        inner.step_log.push(StepLogEntry {
            task_id: task_id.to_string(),
            step: step.encode(),
            phase: "failed",
        });
        Ok(())
    }

    async fn save_checkpoint(&self, checkpoint: &StepCheckpoint) -> Result<(), StoreError> {
        self.inner
            .lock()
            .checkpoints
            .insert(checkpoint.task_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load_checkpoint(&self, task_id: &str) -> Result<Option<StepCheckpoint>, StoreError> {
        Ok(self.inner.lock().checkpoints.get(task_id).cloned())
    }

    async fn load_framework(&self, roadmap_id: &str) -> Result<CurriculumFramework, StoreError> {
        self.inner
            .lock()
            .frameworks
            .get(roadmap_id)
            .cloned()
            .ok_or_else(|| StoreError::RoadmapNotFound(roadmap_id.to_string()))
    }

    async fn flush_content_batch(
        &self,
        _task_id: &str,
        roadmap_id: &str,
        batch: &[ArtifactRow],
        framework: &CurriculumFramework,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        for row in batch {
            inner
                .artifacts
                .insert((row.concept_id.clone(), row.content_type), row.clone());
        }
        inner
            .frameworks
            .insert(roadmap_id.to_string(), framework.clone());
        inner.flush_sizes.push(batch.len());
        Ok(())
    }

    async fn finalize_task(
        &self,
        task_id: &str,
        status: TaskStatus,
        summary: &ExecutionSummary,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let stored = inner.task_mut(task_id)?;
        if stored.status.is_terminal() {
            // Redelivered job finished twice; the first terminal write wins.
            return Ok(());
        }
        stored.status = status;
        stored.current_step = StepKind::Done;
        stored.summary = summary.clone();
        stored.updated_at = chrono::Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn begin_step_rejects_terminal_tasks() {
        let store = InMemoryTaskStore::new();
        let mut task = Task::new("alice");
        store.create_task(&task).await.unwrap();
        store
            .finalize_task(&task.id, TaskStatus::Completed, &ExecutionSummary::default())
            .await
            .unwrap();

        task.current_step = StepKind::Design;
        let err = store.begin_step(&task).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyTerminal { .. }));
    }

    #[tokio::test]
    async fn done_step_only_appears_with_terminal_status() {
        let store = InMemoryTaskStore::new();
        let task = Task::new("alice");
        store.create_task(&task).await.unwrap();

        store
            .fail_step(&task.id, StepKind::Validate, "boom")
            .await
            .unwrap();
        let view = store.status(&task.id).await.unwrap();
        assert_eq!(view.current_step, StepKind::Done);
        assert!(view.status.is_terminal());
    }

    #[tokio::test]
    async fn finalize_is_idempotent_under_redelivery() {
        let store = InMemoryTaskStore::new();
        let task = Task::new("alice");
        store.create_task(&task).await.unwrap();

        store
            .finalize_task(&task.id, TaskStatus::Completed, &ExecutionSummary::default())
            .await
            .unwrap();
        store
            .finalize_task(&task.id, TaskStatus::PartialFailure, &ExecutionSummary::default())
            .await
            .unwrap();
        let view = store.status(&task.id).await.unwrap();
        assert_eq!(view.status, TaskStatus::Completed);
    }
}
