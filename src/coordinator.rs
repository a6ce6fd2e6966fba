//! Transactional bracket around every step execution.
//!
//! The [`Coordinator`] owns the write protocol the pipeline relies on:
//! each step is entered with one transaction (`begin_step`), its whole
//! output lands with one composite transaction (`complete_step`), and
//! failures are classified before any status is touched. Notification
//! publishes sit strictly outside the transactions, after the commit,
//! so a slow or dead channel can never hold a database lock.

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::events::{EventChannel, PipelineEvent};
use crate::model::{Task, TaskStatus};
use crate::pipeline::{ErrorClass, StepContext, StepDelta, StepError, StepHandler};
use crate::state::TaskState;
use crate::steps::StepKind;
use crate::store::{StoreError, TaskStore};

/// Errors produced while bracketing a step.
#[derive(Debug, Error, Diagnostic)]
pub enum CoordinatorError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    /// The handler itself failed; `class` tells the caller whether the
    /// step is retryable.
    #[error("step {step} failed ({class:?}): {source}")]
    #[diagnostic(code(courseforge::coordinator::step_failed))]
    Step {
        step: StepKind,
        class: ErrorClass,
        #[source]
        source: StepError,
    },
}

impl CoordinatorError {
    /// Whether the failed step may be retried from its checkpoint.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordinatorError::Step {
                class: ErrorClass::Transient,
                ..
            }
        )
    }
}

/// Brackets step handlers with transactions and post-commit events.
#[derive(Clone)]
pub struct Coordinator {
    store: Arc<dyn TaskStore>,
    events: EventChannel,
}

impl Coordinator {
    pub fn new(store: Arc<dyn TaskStore>, events: EventChannel) -> Self {
        Self { store, events }
    }

    /// Execute one step under the write protocol.
    ///
    /// 1. Persist the step entry (current step, in-flight status, branch
    ///    tag) in one transaction, then publish `step_started`.
    /// 2. Run the handler against the read-only state snapshot.
    /// 3. On success, persist the task row and every delta field as one
    ///    composite write, then publish `step_completed`.
    /// 4. On failure, classify: transient errors change nothing and
    ///    bubble up retryable; validation and system errors mark the
    ///    task failed (status and `current_step = Done` in the same
    ///    transaction) before `step_failed`/`task_failed` go out.
    #[instrument(skip(self, task, handler, state), fields(task_id = %task.id, step = %step), err)]
    pub async fn execute_step(
        &self,
        task: &mut Task,
        step: StepKind,
        attempt: u32,
        handler: &Arc<dyn StepHandler>,
        state: &TaskState,
    ) -> Result<StepDelta, CoordinatorError> {
        task.current_step = step;
        task.status = if step == StepKind::Review {
            TaskStatus::HumanReviewPending
        } else {
            TaskStatus::Processing
        };
        task.updated_at = chrono::Utc::now();
        self.store.begin_step(task).await?;
        self.events
            .publish(PipelineEvent::step_started(&task.id, step));

        let ctx = StepContext::new(&task.id, step, attempt, self.events.clone());
        match handler.run(state, ctx).await {
            Ok(delta) => {
                task.updated_at = chrono::Utc::now();
                self.store.complete_step(task, &delta).await?;
                info!(attempt, "step completed");
                self.events
                    .publish(PipelineEvent::step_completed(&task.id, step));
                Ok(delta)
            }
            Err(source) => {
                let class = source.class();
                match class {
                    ErrorClass::Transient => {
                        // Nothing committed for this step; the task row
                        // still shows it in flight and a later run can
                        // retry from the last checkpoint.
                        warn!(error = %source, "transient step failure, retryable");
                        self.events.publish(PipelineEvent::step_failed(
                            &task.id,
                            step,
                            source.to_string(),
                        ));
                    }
                    ErrorClass::Validation | ErrorClass::System => {
                        self.store
                            .fail_step(&task.id, step, &source.to_string())
                            .await?;
                        task.status = TaskStatus::Failed;
                        task.current_step = StepKind::Done;
                        self.events.publish(PipelineEvent::step_failed(
                            &task.id,
                            step,
                            source.to_string(),
                        ));
                        self.events.publish(PipelineEvent::task_failed(
                            &task.id,
                            source.to_string(),
                        ));
                    }
                }
                Err(CoordinatorError::Step {
                    step,
                    class,
                    source,
                })
            }
        }
    }
}
