//! Step execution seam for the pipeline graph.
//!
//! Each step of the fixed topology is a [`StepHandler`]: a pure async
//! function from the current [`TaskState`] to a [`StepDelta`]. Handlers
//! never write to the store and never open transactions — the
//! coordinator brackets them. They may emit fine-grained progress
//! through the [`StepContext`].

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

use crate::events::{EventChannel, PipelineEvent};
use crate::model::{
    CurriculumFramework, EditPlan, ResolvedIntent, ReviewDecision, ValidationResult,
};
use crate::state::TaskState;
use crate::steps::StepKind;
use crate::worker::ContentJob;

/// One executable step.
///
/// # Design
///
/// - **Pure**: read the snapshot, return a delta; no store access.
/// - **Focused**: one step, one responsibility.
/// - **Observable**: use the context for progress events.
///
/// Fatal problems are returned as [`StepError`]; the coordinator
/// classifies them and decides the rollback scope.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn run(&self, state: &TaskState, ctx: StepContext) -> Result<StepDelta, StepError>;
}

/// Execution context passed to a step handler.
#[derive(Clone, Debug)]
pub struct StepContext {
    pub task_id: String,
    pub step: StepKind,
    /// 1-based pass count for steps inside a branch loop.
    pub attempt: u32,
    events: EventChannel,
}

impl StepContext {
    pub fn new(
        task_id: impl Into<String>,
        step: StepKind,
        attempt: u32,
        events: EventChannel,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            step,
            attempt,
            events,
        }
    }

    /// Publish any event through the task's notification channel.
    /// Best-effort, like every publish.
    pub fn publish(&self, event: PipelineEvent) {
        self.events.publish(event);
    }
}

/// Partial state produced by one step.
///
/// All fields optional; the engine merges the delta into [`TaskState`]
/// and the coordinator persists the set fields as one composite write.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepDelta {
    pub intent: Option<ResolvedIntent>,
    pub framework: Option<CurriculumFramework>,
    pub validation: Option<ValidationResult>,
    pub edit_plan: Option<EditPlan>,
    pub review: Option<ReviewDecision>,
    /// Job the dispatch step wants enqueued for the background phase.
    pub dispatch: Option<ContentJob>,
    pub extra: Option<FxHashMap<String, Value>>,
}

impl StepDelta {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_intent(mut self, intent: ResolvedIntent) -> Self {
        self.intent = Some(intent);
        self
    }

    #[must_use]
    pub fn with_framework(mut self, framework: CurriculumFramework) -> Self {
        self.framework = Some(framework);
        self
    }

    #[must_use]
    pub fn with_validation(mut self, validation: ValidationResult) -> Self {
        self.validation = Some(validation);
        self
    }

    #[must_use]
    pub fn with_edit_plan(mut self, plan: EditPlan) -> Self {
        self.edit_plan = Some(plan);
        self
    }

    #[must_use]
    pub fn with_review(mut self, review: ReviewDecision) -> Self {
        self.review = Some(review);
        self
    }

    #[must_use]
    pub fn with_dispatch(mut self, job: ContentJob) -> Self {
        self.dispatch = Some(job);
        self
    }

    #[must_use]
    pub fn with_extra(mut self, extra: FxHashMap<String, Value>) -> Self {
        self.extra = Some(extra);
        self
    }
}

/// How a step failure should be handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Recoverable I/O: roll back the step's savepoint only; the same
    /// step can be retried from the last checkpoint.
    Transient,
    /// Business/validation failure: recorded, task marked failed,
    /// sibling state left intact.
    Validation,
    /// System failure: whole enclosing transaction rolled back, task
    /// marked failed.
    System,
}

/// Errors that halt a step.
#[derive(Debug, Error, Diagnostic)]
pub enum StepError {
    /// Expected input is missing from the working state.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(courseforge::step::missing_input),
        help("Check that the preceding step produced the required data.")
    )]
    MissingInput { what: &'static str },

    /// Recoverable I/O failure (network, provider backoff).
    #[error("transient failure: {0}")]
    #[diagnostic(
        code(courseforge::step::transient),
        help("The step can be retried from the last checkpoint.")
    )]
    Transient(String),

    /// Business-level validation failure.
    #[error("validation failed: {0}")]
    #[diagnostic(code(courseforge::step::validation))]
    Invalid(String),

    /// JSON (de)serialization failure inside a handler.
    #[error(transparent)]
    #[diagnostic(code(courseforge::step::serde))]
    Serde(#[from] serde_json::Error),

    /// Unrecoverable system failure.
    #[error("system failure: {0}")]
    #[diagnostic(code(courseforge::step::system))]
    System(String),
}

impl StepError {
    /// Classification drives the coordinator's rollback scope.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            StepError::Transient(_) => ErrorClass::Transient,
            StepError::Invalid(_) => ErrorClass::Validation,
            StepError::MissingInput { .. } | StepError::Serde(_) | StepError::System(_) => {
                ErrorClass::System
            }
        }
    }
}
