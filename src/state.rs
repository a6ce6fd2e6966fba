//! Working state carried between pipeline steps.
//!
//! [`TaskState`] is the in-memory accumulation of everything the steps
//! have produced so far. Handlers never mutate it directly: they return
//! a [`StepDelta`](crate::pipeline::StepDelta) and the engine merges it
//! through [`TaskState::apply`], so each step's effects land in one
//! place and the state written to a checkpoint always reflects whole
//! steps, never a half-applied one.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{
    CurriculumFramework, EditPlan, Issue, ResolvedIntent, ReviewDecision, ValidationResult,
};
use crate::pipeline::StepDelta;

/// Everything the pipeline has produced for one task so far.
///
/// Serializable as-is; the store checkpoints it after every step.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub intent: Option<ResolvedIntent>,
    pub framework: Option<CurriculumFramework>,
    pub validation: Option<ValidationResult>,
    /// Plan awaiting consumption by the branch's edit step. Taken (not
    /// read) so it is consumed exactly once.
    pub pending_edit_plan: Option<EditPlan>,
    pub review: Option<ReviewDecision>,
    /// Critical issues carried into review when the validation retry cap
    /// is exhausted.
    #[serde(default)]
    pub carried_issues: Vec<Issue>,
    /// Validation passes run so far (the first pass plus loop passes).
    #[serde(default)]
    pub validation_attempts: u32,
    /// Review rounds run so far.
    #[serde(default)]
    pub review_rounds: u32,
    /// Free-form metadata shared between steps.
    #[serde(default)]
    pub extra: FxHashMap<String, Value>,
}

impl TaskState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one step's output. Fields the delta does not set are left
    /// untouched; counters tied to specific outputs advance here so the
    /// engine and the checkpoint always agree on loop progress.
    pub fn apply(&mut self, delta: StepDelta) {
        if let Some(intent) = delta.intent {
            self.intent = Some(intent);
        }
        if let Some(framework) = delta.framework {
            self.framework = Some(framework);
        }
        if let Some(validation) = delta.validation {
            self.validation_attempts += 1;
            self.validation = Some(validation);
        }
        if let Some(plan) = delta.edit_plan {
            self.pending_edit_plan = Some(plan);
        }
        if let Some(review) = delta.review {
            self.review_rounds += 1;
            self.review = Some(review);
        }
        if let Some(extra) = delta.extra {
            self.extra.extend(extra);
        }
    }

    /// Take the pending edit plan, consuming it.
    pub fn take_edit_plan(&mut self) -> Option<EditPlan> {
        self.pending_edit_plan.take()
    }
}
