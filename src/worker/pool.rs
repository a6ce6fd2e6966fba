//! Background content generation.
//!
//! The [`WorkerPool`] consumes [`ContentJob`]s: it fans each concept
//! out to an [`ArtifactGenerator`] under a concurrency limit, and lands
//! completed units through a shared [`CompletionBuffer`] that batches
//! persistence instead of writing row-by-row.
//!
//! # Flush protocol
//!
//! The buffer is guarded by an async mutex, and the flush happens while
//! the lock is held. That serializes flushes in lock-acquisition order
//! and means a completed unit is either in the pending batch or already
//! durable, never both. The evolving framework snapshot is rewritten
//! from the full accumulator state on every flush, so a reader of the
//! roadmap document always sees every completion flushed so far.

use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::events::{EventChannel, PipelineEvent};
use crate::generate::{ArtifactGenerator, GenerateError};
use crate::model::{
    ArtifactRef, Concept, ConceptFailure, ConceptId, ContentKind, CurriculumFramework,
    ExecutionSummary, TaskStatus,
};
use crate::store::{ArtifactRow, StoreError, TaskStore};

use super::job::{ContentJob, JobOutcome};
use super::queue::{JobQueue, QueueError};

/// Tunables for the background phase.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Concepts generated concurrently.
    pub concurrency: usize,
    /// Completed concepts per persistence batch.
    pub batch_size: usize,
    /// Wall-clock budget for one concept's three artifacts.
    pub unit_timeout: std::time::Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            batch_size: 10,
            unit_timeout: std::time::Duration::from_secs(120),
        }
    }
}

/// Errors that abort job processing. Units that merely fail generation
/// are recorded on the outcome, not raised here.
#[derive(Debug, Error, Diagnostic)]
pub enum WorkerError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error("queue error: {0}")]
    #[diagnostic(code(courseforge::worker::queue))]
    Queue(#[from] QueueError),
}

/// Accumulates completed units between flushes.
///
/// Two accumulator maps mirror the two content families: narrative
/// content (tutorial and resources) and assessment (quiz). The roadmap
/// snapshot written by each flush is rebuilt from these maps plus the
/// failure list, so the snapshot's artifact references always point at
/// rows the flushes have actually carried.
struct CompletionBuffer {
    framework: CurriculumFramework,
    content: FxHashMap<(ConceptId, ContentKind), ArtifactRow>,
    quiz: FxHashMap<ConceptId, ArtifactRow>,
    /// Concepts already counted as completed, including ones a prior
    /// delivery landed.
    landed: FxHashSet<ConceptId>,
    pending_rows: Vec<ArtifactRow>,
    pending_units: usize,
    failures: Vec<ConceptFailure>,
    completed: usize,
    flushes: usize,
    flush_error: Option<StoreError>,
}

impl CompletionBuffer {
    fn new(framework: CurriculumFramework) -> Self {
        Self {
            framework,
            content: FxHashMap::default(),
            quiz: FxHashMap::default(),
            landed: FxHashSet::default(),
            pending_rows: Vec::new(),
            pending_units: 0,
            failures: Vec::new(),
            completed: 0,
            flushes: 0,
            flush_error: None,
        }
    }

    /// Mark a unit's slots `Generating` for a fresh attempt. Slots a
    /// prior delivery already completed are left alone, as is any unit
    /// this run has already landed.
    fn begin_unit(&mut self, concept_id: &str) {
        if self.landed.contains(concept_id) {
            return;
        }
        if let Some(concept) = self.framework.find_concept_mut(concept_id) {
            for kind in ContentKind::ALL {
                let slot = concept.slot_mut(kind);
                if !slot.is_completed() {
                    slot.begin_attempt();
                }
            }
        }
    }

    /// Record one completed unit. First write wins: a duplicate unit
    /// within the job changes nothing and returns `false`.
    fn record_unit(&mut self, concept_id: &str, rows: Vec<ArtifactRow>) -> bool {
        if !self.landed.insert(concept_id.to_string()) {
            return false;
        }
        for row in &rows {
            match row.content_type {
                ContentKind::Tutorial | ContentKind::Resources => {
                    self.content
                        .insert((concept_id.to_string(), row.content_type), row.clone());
                }
                ContentKind::Quiz => {
                    self.quiz.insert(concept_id.to_string(), row.clone());
                }
            }
        }
        self.pending_units += 1;
        self.pending_rows.extend(rows);
        self.completed += 1;
        true
    }

    /// Count a concept a previous delivery already populated, without
    /// re-queuing any rows.
    fn record_prior(&mut self, concept_id: &str) {
        if self.landed.insert(concept_id.to_string()) {
            self.completed += 1;
        }
    }

    fn record_failure(&mut self, concept_id: &str, reason: String) {
        self.failures.push(ConceptFailure {
            concept_id: concept_id.to_string(),
            reason,
        });
    }

    /// Rewrite the roadmap snapshot from the accumulator maps and the
    /// failure list. Slots of failed units that never completed are
    /// marked `Failed`; everything in the maps is marked `Completed`
    /// with its landed artifact reference.
    fn rebuild_snapshot(&mut self) {
        let Self {
            framework,
            content,
            quiz,
            failures,
            ..
        } = self;
        for ((concept_id, kind), row) in content.iter() {
            if let Some(concept) = framework.find_concept_mut(concept_id) {
                concept.slot_mut(*kind).complete(ArtifactRef {
                    artifact_id: row.artifact_id.clone(),
                    version: row.version,
                });
            }
        }
        for (concept_id, row) in quiz.iter() {
            if let Some(concept) = framework.find_concept_mut(concept_id) {
                concept.slot_mut(ContentKind::Quiz).complete(ArtifactRef {
                    artifact_id: row.artifact_id.clone(),
                    version: row.version,
                });
            }
        }
        for failure in failures.iter() {
            if let Some(concept) = framework.find_concept_mut(&failure.concept_id) {
                for kind in ContentKind::ALL {
                    let slot = concept.slot_mut(kind);
                    if !slot.is_completed() {
                        slot.fail();
                    }
                }
            }
        }
    }
}

/// Processes background jobs to their terminal status.
pub struct WorkerPool {
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn JobQueue>,
    generator: Arc<dyn ArtifactGenerator>,
    events: EventChannel,
    config: WorkerConfig,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn TaskStore>,
        queue: Arc<dyn JobQueue>,
        generator: Arc<dyn ArtifactGenerator>,
        events: EventChannel,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            queue,
            generator,
            events,
            config,
        }
    }

    /// Dequeue and process one job. `None` when the queue is empty.
    pub async fn run_next(&self) -> Result<Option<JobOutcome>, WorkerError> {
        let Some(delivery) = self.queue.dequeue().await? else {
            return Ok(None);
        };
        let outcome = self.run_job(&delivery.job).await?;
        self.queue.ack(&delivery.delivery_id).await?;
        Ok(Some(outcome))
    }

    /// Process jobs until the queue is empty.
    pub async fn drain(&self) -> Result<Vec<JobOutcome>, WorkerError> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.run_next().await? {
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Process one job to its terminal status.
    ///
    /// Safe under redelivery: a terminal task is acknowledged without
    /// work, already-populated concepts are skipped, and artifact rows
    /// are upserts.
    #[instrument(skip(self, job), fields(task_id = %job.task_id, concepts = job.concept_ids.len()), err)]
    pub async fn run_job(&self, job: &ContentJob) -> Result<JobOutcome, WorkerError> {
        let task = self.store.load_task(&job.task_id).await?;
        if task.status.is_terminal() {
            info!(status = %task.status, "job for terminal task, nothing to do");
            return Ok(JobOutcome {
                status: task.status,
                completed: task.summary.concepts_completed as usize,
                failed: task.summary.concepts_failed as usize,
                failures: task.summary.failures.clone(),
                flushes: 0,
            });
        }

        let framework = self.store.load_framework(&job.roadmap_id).await?;

        if job.concept_ids.is_empty() {
            let summary = ExecutionSummary {
                validation_passes: task.summary.validation_passes,
                review_passes: task.summary.review_passes,
                ..ExecutionSummary::default()
            };
            self.store
                .finalize_task(&job.task_id, TaskStatus::Completed, &summary)
                .await?;
            self.events.publish(PipelineEvent::task_completed(
                &job.task_id,
                TaskStatus::Completed,
            ));
            return Ok(JobOutcome {
                status: TaskStatus::Completed,
                completed: 0,
                failed: 0,
                failures: Vec::new(),
                flushes: 0,
            });
        }

        let units: Vec<Concept> = job
            .concept_ids
            .iter()
            .filter_map(|id| framework.concepts().find(|c| &c.id == id).cloned())
            .collect();

        let buffer = Arc::new(Mutex::new(CompletionBuffer::new(framework)));
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));

        let work = units.iter().map(|concept| {
            let semaphore = semaphore.clone();
            let buffer = buffer.clone();
            async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return;
                };
                self.process_unit(job, concept, &buffer).await;
            }
        });
        futures_util::future::join_all(work).await;

        let mut buf = buffer.lock().await;
        if let Some(err) = buf.flush_error.take() {
            // Leave the job un-acked upstream; redelivery will converge
            // on the rows already flushed.
            return Err(WorkerError::Store(err));
        }
        // A failure-only remainder still flushes, so the snapshot's
        // failed slot marks become durable.
        if buf.pending_units > 0 || !buf.failures.is_empty() {
            self.flush_batch(job, &mut buf).await?;
        }

        let status = if buf.failures.is_empty() {
            TaskStatus::Completed
        } else {
            TaskStatus::PartialFailure
        };
        let summary = ExecutionSummary {
            validation_passes: task.summary.validation_passes,
            review_passes: task.summary.review_passes,
            concepts_completed: buf.completed as u32,
            concepts_failed: buf.failures.len() as u32,
            failures: buf.failures.clone(),
        };
        self.store
            .finalize_task(&job.task_id, status, &summary)
            .await?;
        self.events
            .publish(PipelineEvent::task_completed(&job.task_id, status));
        info!(
            completed = buf.completed,
            failed = buf.failures.len(),
            flushes = buf.flushes,
            "background job finished"
        );

        Ok(JobOutcome {
            status,
            completed: buf.completed,
            failed: buf.failures.len(),
            failures: buf.failures.clone(),
            flushes: buf.flushes,
        })
    }

    /// Flush the pending batch and the rebuilt roadmap snapshot as one
    /// transaction. Call with the buffer lock held.
    async fn flush_batch(
        &self,
        job: &ContentJob,
        buf: &mut CompletionBuffer,
    ) -> Result<(), StoreError> {
        let rows = std::mem::take(&mut buf.pending_rows);
        buf.pending_units = 0;
        buf.rebuild_snapshot();
        self.store
            .flush_content_batch(&job.task_id, &job.roadmap_id, &rows, &buf.framework)
            .await?;
        buf.flushes += 1;
        Ok(())
    }

    /// Generate all three artifacts for one concept and land them.
    async fn process_unit(
        &self,
        job: &ContentJob,
        concept: &Concept,
        buffer: &Arc<Mutex<CompletionBuffer>>,
    ) {
        // Redelivered job: skip concepts a previous run already landed.
        if concept.is_fully_populated() {
            buffer.lock().await.record_prior(&concept.id);
            return;
        }
        buffer.lock().await.begin_unit(&concept.id);

        let generated = tokio::time::timeout(
            self.config.unit_timeout,
            self.generate_unit(&job.task_id, concept),
        )
        .await;

        let reason = match generated {
            Ok(Ok(rows)) => {
                let mut buf = buffer.lock().await;
                if !buf.record_unit(&concept.id, rows) {
                    return;
                }
                if buf.pending_units >= self.config.batch_size {
                    if let Err(err) = self.flush_batch(job, &mut buf).await {
                        warn!(error = %err, "batch flush failed");
                        if buf.flush_error.is_none() {
                            buf.flush_error = Some(err);
                        }
                    }
                }
                drop(buf);
                for kind in ContentKind::ALL {
                    self.events.publish(PipelineEvent::concept_completed(
                        &job.task_id,
                        &concept.id,
                        kind,
                    ));
                }
                return;
            }
            Ok(Err(err)) => err.to_string(),
            Err(_) => format!("timed out after {}s", self.config.unit_timeout.as_secs()),
        };

        warn!(concept_id = %concept.id, %reason, "concept generation failed");
        buffer
            .lock()
            .await
            .record_failure(&concept.id, reason.clone());
        self.events.publish(PipelineEvent::concept_failed(
            &job.task_id,
            &concept.id,
            ContentKind::Tutorial,
            reason,
        ));
    }

    /// All three artifacts for a concept, in a fixed order.
    async fn generate_unit(
        &self,
        task_id: &str,
        concept: &Concept,
    ) -> Result<Vec<ArtifactRow>, GenerateError> {
        let mut rows = Vec::with_capacity(ContentKind::ALL.len());
        for kind in ContentKind::ALL {
            self.events
                .publish(PipelineEvent::concept_started(task_id, &concept.id, kind));
            let artifact = self.generator.generate(concept, kind).await?;
            rows.push(ArtifactRow {
                concept_id: concept.id.clone(),
                content_type: kind,
                artifact_id: Uuid::new_v4().to_string(),
                version: artifact.version,
                body: artifact.body,
            });
        }
        Ok(rows)
    }
}
