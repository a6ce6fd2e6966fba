//! Pipeline assembly and the step-routing engine.
//!
//! [`PipelineBuilder`] collects one handler per [`StepKind`] and
//! [`compile`](PipelineBuilder::compile)s into an immutable
//! [`Pipeline`]; compilation fails if any dispatchable step is missing
//! a handler, so routing never hits an unregistered step at runtime.
//!
//! [`PipelineEngine`] drives a task through the fixed topology:
//! execute a step through the coordinator, merge its delta into the
//! working state, checkpoint, route to the next step. Resume is the
//! same loop started from the latest checkpoint.

use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::PipelineConfig;
use crate::coordinator::{Coordinator, CoordinatorError};
use crate::events::EventChannel;
use crate::model::{Task, TaskStatus, TaskStatusView};
use crate::state::TaskState;
use crate::steps::{BranchSource, StepKind};
use crate::store::{StepCheckpoint, StoreError, TaskStore};
use crate::worker::{ContentJob, JobQueue, QueueError};

use super::handler::StepHandler;

/// Errors raised while assembling a [`Pipeline`].
#[derive(Debug, Error, Diagnostic)]
pub enum CompileError {
    #[error("missing handlers for steps: {0:?}")]
    #[diagnostic(
        code(courseforge::pipeline::missing_handlers),
        help("Register a handler for every dispatchable step before compiling.")
    )]
    MissingHandlers(Vec<String>),
}

/// Errors raised while driving a task.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Coordinator(#[from] CoordinatorError),

    #[error("queue error: {0}")]
    #[diagnostic(code(courseforge::engine::queue))]
    Queue(#[from] QueueError),

    /// A routed step has no handler. Unreachable after a successful
    /// compile; kept as an error to avoid panics on hand-built pipelines.
    #[error("no handler registered for step {0}")]
    #[diagnostic(code(courseforge::engine::no_handler))]
    NoHandler(StepKind),

    #[error("step {step} completed without producing {what}")]
    #[diagnostic(code(courseforge::engine::missing_output))]
    MissingOutput { step: StepKind, what: &'static str },

    #[error("cannot route from step {0}")]
    #[diagnostic(code(courseforge::engine::invalid_route))]
    InvalidRoute(StepKind),
}

/// Collects handlers for the fixed topology.
#[derive(Default)]
pub struct PipelineBuilder {
    handlers: FxHashMap<StepKind, Arc<dyn StepHandler>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for one step. Re-registering replaces the
    /// previous handler.
    #[must_use]
    pub fn with_handler<H>(mut self, step: StepKind, handler: H) -> Self
    where
        H: StepHandler + 'static,
    {
        self.handlers.insert(step, Arc::new(handler));
        self
    }

    /// Register one handler for both branch-tagged variants of a step
    /// family, for edit steps whose logic does not depend on the loop.
    #[must_use]
    pub fn with_edit_handler<H>(self, handler: H) -> Self
    where
        H: StepHandler + 'static,
    {
        let shared: Arc<dyn StepHandler> = Arc::new(handler);
        let mut this = self;
        this.handlers
            .insert(StepKind::Edit(BranchSource::Validation), shared.clone());
        this.handlers.insert(StepKind::Edit(BranchSource::Review), shared);
        this
    }

    /// Validate completeness and freeze the pipeline.
    pub fn compile(self) -> Result<Pipeline, CompileError> {
        let missing: Vec<String> = StepKind::HANDLED
            .iter()
            .filter(|step| !self.handlers.contains_key(step))
            .map(|step| step.encode())
            .collect();
        if !missing.is_empty() {
            return Err(CompileError::MissingHandlers(missing));
        }
        Ok(Pipeline {
            handlers: self.handlers,
        })
    }
}

/// An immutable, fully-populated handler table.
pub struct Pipeline {
    handlers: FxHashMap<StepKind, Arc<dyn StepHandler>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Pipeline {
    pub fn handler(&self, step: StepKind) -> Option<&Arc<dyn StepHandler>> {
        self.handlers.get(&step)
    }
}

/// Where a foreground run stopped.
#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    /// The dispatch step handed a job to the background queue; the
    /// worker pool now owns the terminal transition.
    Dispatched(ContentJob),
    /// The task was already terminal when the run started.
    AlreadyTerminal(TaskStatus),
}

/// Drives tasks through the pipeline.
pub struct PipelineEngine {
    pipeline: Arc<Pipeline>,
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn JobQueue>,
    coordinator: Coordinator,
    config: PipelineConfig,
}

impl PipelineEngine {
    pub fn new(
        pipeline: Pipeline,
        store: Arc<dyn TaskStore>,
        queue: Arc<dyn JobQueue>,
        events: EventChannel,
        config: PipelineConfig,
    ) -> Self {
        let coordinator = Coordinator::new(store.clone(), events);
        Self {
            pipeline: Arc::new(pipeline),
            store,
            queue,
            coordinator,
            config,
        }
    }

    /// Create and persist a fresh task, positioned at the first step.
    pub async fn create_task(&self, owner: impl Into<String>) -> Result<Task, EngineError> {
        let task = Task::new(owner);
        self.store.create_task(&task).await?;
        Ok(task)
    }

    /// Read-only status projection for polling clients.
    pub async fn status(&self, task_id: &str) -> Result<TaskStatusView, EngineError> {
        Ok(self.store.status(task_id).await?)
    }

    /// Run the foreground phase of a task to the dispatch handoff.
    ///
    /// Starts from the latest checkpoint when one exists, so a run
    /// interrupted at any point resumes after its last completed step
    /// without re-executing it. The call returns once the background
    /// job is enqueued; terminal status is written by the worker pool.
    #[instrument(skip(self), err)]
    pub async fn run_task(&self, task_id: &str) -> Result<RunOutcome, EngineError> {
        let mut task = self.store.load_task(task_id).await?;
        if task.status.is_terminal() {
            return Ok(RunOutcome::AlreadyTerminal(task.status));
        }

        let (mut state, mut next) = match self.store.load_checkpoint(task_id).await? {
            Some(checkpoint) => {
                info!(resumed_after = %checkpoint.step, "resuming from checkpoint");
                if checkpoint.step == StepKind::ContentDispatch {
                    // Checkpoint landed but the enqueue may not have;
                    // re-enqueue. The worker side is idempotent.
                    let job = self.rebuild_job(&task, &checkpoint.state)?;
                    self.queue.enqueue(job.clone()).await?;
                    return Ok(RunOutcome::Dispatched(job));
                }
                let mut state = checkpoint.state;
                let next = self.route(checkpoint.step, &mut state, &mut task)?;
                (state, next)
            }
            None => (TaskState::new(), StepKind::Intent),
        };

        loop {
            let handler = self
                .pipeline
                .handler(next)
                .cloned()
                .ok_or(EngineError::NoHandler(next))?;
            let attempt = self.attempt_for(next, &state);
            let delta = self
                .coordinator
                .execute_step(&mut task, next, attempt, &handler, &state)
                .await?;
            let dispatch = delta.dispatch.clone();
            state.apply(delta);
            if matches!(next, StepKind::Edit(_)) {
                // The plan is consumed by the edit that just ran.
                state.take_edit_plan();
            }
            self.record_progress(next, &state, &mut task);

            self.store
                .save_checkpoint(&StepCheckpoint::new(&task.id, next, state.clone()))
                .await?;

            if next == StepKind::ContentDispatch {
                let job = match dispatch {
                    Some(job) => job,
                    None => self.rebuild_job(&task, &state)?,
                };
                self.queue.enqueue(job.clone()).await?;
                info!(concepts = job.concept_ids.len(), "dispatched background job");
                return Ok(RunOutcome::Dispatched(job));
            }

            next = self.route(next, &mut state, &mut task)?;
        }
    }

    /// 1-based pass number for steps revisited by a loop.
    fn attempt_for(&self, step: StepKind, state: &TaskState) -> u32 {
        match step {
            StepKind::Validate => state.validation_attempts + 1,
            StepKind::Review => state.review_rounds + 1,
            StepKind::EditPlan(BranchSource::Validation)
            | StepKind::Edit(BranchSource::Validation) => state.validation_attempts,
            StepKind::EditPlan(BranchSource::Review) | StepKind::Edit(BranchSource::Review) => {
                state.review_rounds
            }
            _ => 1,
        }
    }

    /// Project loop counters from the working state onto the task row.
    fn record_progress(&self, step: StepKind, state: &TaskState, task: &mut Task) {
        match step {
            StepKind::Intent => {
                task.roadmap_id = state.intent.as_ref().map(|i| i.roadmap_id.clone());
            }
            StepKind::Validate => task.summary.validation_passes = state.validation_attempts,
            StepKind::Review => task.summary.review_passes = state.review_rounds,
            _ => {}
        }
    }

    /// Decide the step after `completed`, applying the branch rules.
    ///
    /// Setting or clearing `branch_source` on the task row happens here
    /// so the next `begin_step` persists the loop membership along with
    /// the step entry.
    fn route(
        &self,
        completed: StepKind,
        state: &mut TaskState,
        task: &mut Task,
    ) -> Result<StepKind, EngineError> {
        let next = match completed {
            StepKind::Intent => StepKind::Design,
            StepKind::Design => StepKind::Validate,
            StepKind::Validate => {
                let validation =
                    state
                        .validation
                        .as_ref()
                        .ok_or(EngineError::MissingOutput {
                            step: completed,
                            what: "a validation result",
                        })?;
                if validation.passed(self.config.validation_threshold) {
                    task.branch_source = None;
                    StepKind::Review
                } else if state.validation_attempts > self.config.validation_retry_cap {
                    // Cap exhausted: hand the unresolved critical issues
                    // to the reviewer instead of failing the task.
                    state.carried_issues = validation.critical_issues();
                    warn!(
                        attempts = state.validation_attempts,
                        carried = state.carried_issues.len(),
                        "validation retry cap exhausted, escalating to review"
                    );
                    task.branch_source = None;
                    StepKind::Review
                } else {
                    task.branch_source = Some(BranchSource::Validation);
                    StepKind::EditPlan(BranchSource::Validation)
                }
            }
            StepKind::EditPlan(source) => StepKind::Edit(source),
            StepKind::Edit(BranchSource::Validation) => StepKind::Validate,
            StepKind::Edit(BranchSource::Review) => StepKind::Review,
            StepKind::Review => {
                let review = state.review.as_ref().ok_or(EngineError::MissingOutput {
                    step: completed,
                    what: "a review decision",
                })?;
                if review.approved {
                    task.branch_source = None;
                    StepKind::ContentDispatch
                } else {
                    task.branch_source = Some(BranchSource::Review);
                    StepKind::EditPlan(BranchSource::Review)
                }
            }
            StepKind::ContentDispatch | StepKind::Done => {
                return Err(EngineError::InvalidRoute(completed));
            }
        };
        Ok(next)
    }

    /// Reconstruct the dispatch job from the checkpointed framework.
    fn rebuild_job(&self, task: &Task, state: &TaskState) -> Result<ContentJob, EngineError> {
        let framework = state.framework.as_ref().ok_or(EngineError::MissingOutput {
            step: StepKind::ContentDispatch,
            what: "a curriculum framework",
        })?;
        Ok(ContentJob::new(
            &task.id,
            &framework.roadmap_id,
            framework.concept_ids(),
        ))
    }
}
