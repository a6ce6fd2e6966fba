//! The orchestrated task record and its status machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::steps::{BranchSource, StepKind};

/// Identifier of one pipeline task.
pub type TaskId = String;

/// Task lifecycle status.
///
/// Transitions are monotonic except inside the two branch loops, which
/// revisit `Processing`/`HumanReviewPending`; `branch_source` on the task
/// row disambiguates which loop is active. `current_step` only reaches
/// [`StepKind::Done`] in the same write that sets one of the three
/// terminal statuses, so a task can never look finished while a
/// background job is still queued.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Processing,
    HumanReviewPending,
    Completed,
    PartialFailure,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::HumanReviewPending => "human_review_pending",
            TaskStatus::Completed => "completed",
            TaskStatus::PartialFailure => "partial_failure",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "processing" => Some(TaskStatus::Processing),
            "human_review_pending" => Some(TaskStatus::HumanReviewPending),
            "completed" => Some(TaskStatus::Completed),
            "partial_failure" => Some(TaskStatus::PartialFailure),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }

    /// Completed, partial-failure, and failed are terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::PartialFailure | TaskStatus::Failed
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The user's resolved intent; assigns the roadmap identity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolvedIntent {
    pub roadmap_id: String,
    pub topic: String,
    pub audience: String,
    #[serde(default)]
    pub goals: Vec<String>,
}

/// One concept that failed generation, with the reason recorded.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConceptFailure {
    pub concept_id: String,
    pub reason: String,
}

/// Running totals kept on the task row.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub validation_passes: u32,
    pub review_passes: u32,
    pub concepts_completed: u32,
    pub concepts_failed: u32,
    #[serde(default)]
    pub failures: Vec<ConceptFailure>,
}

/// Authoritative record of one pipeline task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub owner: String,
    pub status: TaskStatus,
    pub current_step: StepKind,
    /// Which branch loop is active, if any.
    pub branch_source: Option<BranchSource>,
    /// Set once the intent step resolves.
    pub roadmap_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub summary: ExecutionSummary,
}

impl Task {
    pub fn new(owner: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            owner: owner.into(),
            status: TaskStatus::Pending,
            current_step: StepKind::Intent,
            branch_source: None,
            roadmap_id: None,
            created_at: now,
            updated_at: now,
            summary: ExecutionSummary::default(),
        }
    }

    /// Read-only projection used by the status query endpoint.
    #[must_use]
    pub fn status_view(&self) -> TaskStatusView {
        TaskStatusView {
            task_id: self.id.clone(),
            status: self.status,
            current_step: self.current_step,
            roadmap_id: self.roadmap_id.clone(),
            active_branch: self.branch_source,
        }
    }
}

/// What external callers see when they reconcile after missing events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusView {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub current_step: StepKind,
    pub roadmap_id: Option<String>,
    pub active_branch: Option<BranchSource>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::PartialFailure.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(!TaskStatus::HumanReviewPending.is_terminal());
    }

    #[test]
    fn status_string_round_trip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Processing,
            TaskStatus::HumanReviewPending,
            TaskStatus::Completed,
            TaskStatus::PartialFailure,
            TaskStatus::Failed,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn new_task_starts_at_intent() {
        let task = Task::new("alice");
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.current_step, StepKind::Intent);
        assert!(task.roadmap_id.is_none());
        assert!(task.branch_source.is_none());
    }
}
