//! Event taxonomy for pipeline and worker progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;

use crate::model::{ContentKind, TaskStatus};
use crate::steps::StepKind;

/// One progress event.
///
/// Three levels: pipeline steps, per-concept units inside a worker job,
/// and terminal task outcomes. Delivery is best-effort and unordered
/// across tasks; subscribers reconcile through the authoritative status
/// query after an idle period rather than relying on ordering.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    StepStarted {
        task_id: String,
        step: StepKind,
        timestamp: DateTime<Utc>,
    },
    StepCompleted {
        task_id: String,
        step: StepKind,
        timestamp: DateTime<Utc>,
    },
    StepFailed {
        task_id: String,
        step: StepKind,
        error: String,
        timestamp: DateTime<Utc>,
    },
    ConceptStarted {
        task_id: String,
        concept_id: String,
        content_type: ContentKind,
        timestamp: DateTime<Utc>,
    },
    ConceptCompleted {
        task_id: String,
        concept_id: String,
        content_type: ContentKind,
        timestamp: DateTime<Utc>,
    },
    ConceptFailed {
        task_id: String,
        concept_id: String,
        content_type: ContentKind,
        error: String,
        timestamp: DateTime<Utc>,
    },
    TaskCompleted {
        task_id: String,
        status: TaskStatus,
        timestamp: DateTime<Utc>,
    },
    TaskFailed {
        task_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    pub fn step_started(task_id: impl Into<String>, step: StepKind) -> Self {
        PipelineEvent::StepStarted {
            task_id: task_id.into(),
            step,
            timestamp: Utc::now(),
        }
    }

    pub fn step_completed(task_id: impl Into<String>, step: StepKind) -> Self {
        PipelineEvent::StepCompleted {
            task_id: task_id.into(),
            step,
            timestamp: Utc::now(),
        }
    }

    pub fn step_failed(
        task_id: impl Into<String>,
        step: StepKind,
        error: impl Into<String>,
    ) -> Self {
        PipelineEvent::StepFailed {
            task_id: task_id.into(),
            step,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn concept_started(
        task_id: impl Into<String>,
        concept_id: impl Into<String>,
        content_type: ContentKind,
    ) -> Self {
        PipelineEvent::ConceptStarted {
            task_id: task_id.into(),
            concept_id: concept_id.into(),
            content_type,
            timestamp: Utc::now(),
        }
    }

    pub fn concept_completed(
        task_id: impl Into<String>,
        concept_id: impl Into<String>,
        content_type: ContentKind,
    ) -> Self {
        PipelineEvent::ConceptCompleted {
            task_id: task_id.into(),
            concept_id: concept_id.into(),
            content_type,
            timestamp: Utc::now(),
        }
    }

    pub fn concept_failed(
        task_id: impl Into<String>,
        concept_id: impl Into<String>,
        content_type: ContentKind,
        error: impl Into<String>,
    ) -> Self {
        PipelineEvent::ConceptFailed {
            task_id: task_id.into(),
            concept_id: concept_id.into(),
            content_type,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn task_completed(task_id: impl Into<String>, status: TaskStatus) -> Self {
        PipelineEvent::TaskCompleted {
            task_id: task_id.into(),
            status,
            timestamp: Utc::now(),
        }
    }

    pub fn task_failed(task_id: impl Into<String>, error: impl Into<String>) -> Self {
        PipelineEvent::TaskFailed {
            task_id: task_id.into(),
            error: error.into(),
            timestamp: Utc::now(),
        }
    }

    /// The task this event belongs to.
    pub fn task_id(&self) -> &str {
        match self {
            PipelineEvent::StepStarted { task_id, .. }
            | PipelineEvent::StepCompleted { task_id, .. }
            | PipelineEvent::StepFailed { task_id, .. }
            | PipelineEvent::ConceptStarted { task_id, .. }
            | PipelineEvent::ConceptCompleted { task_id, .. }
            | PipelineEvent::ConceptFailed { task_id, .. }
            | PipelineEvent::TaskCompleted { task_id, .. }
            | PipelineEvent::TaskFailed { task_id, .. } => task_id,
        }
    }

    /// Wire label matching the serde tag.
    pub fn type_label(&self) -> &'static str {
        match self {
            PipelineEvent::StepStarted { .. } => "step_started",
            PipelineEvent::StepCompleted { .. } => "step_completed",
            PipelineEvent::StepFailed { .. } => "step_failed",
            PipelineEvent::ConceptStarted { .. } => "concept_started",
            PipelineEvent::ConceptCompleted { .. } => "concept_completed",
            PipelineEvent::ConceptFailed { .. } => "concept_failed",
            PipelineEvent::TaskCompleted { .. } => "task_completed",
            PipelineEvent::TaskFailed { .. } => "task_failed",
        }
    }

    /// Structured JSON with a normalized shape:
    ///
    /// ```json
    /// { "type": "concept_completed", "task_id": "…", "concept_id": "…",
    ///   "content_type": "tutorial", "timestamp": "2026-01-05T12:34:56Z" }
    /// ```
    pub fn to_json_value(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or_else(|_| json!({}));
        if let Some(obj) = value.as_object_mut() {
            // Wire format carries encoded step names alongside the serde
            // fields; timestamps serialize as RFC3339 already.
            if let Some(step) = self.step() {
                obj.insert("step".into(), json!(step.encode()));
            }
        }
        value
    }

    fn step(&self) -> Option<StepKind> {
        match self {
            PipelineEvent::StepStarted { step, .. }
            | PipelineEvent::StepCompleted { step, .. }
            | PipelineEvent::StepFailed { step, .. } => Some(*step),
            _ => None,
        }
    }
}

impl fmt::Display for PipelineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineEvent::StepStarted { task_id, step, .. } => {
                write!(f, "[{task_id}] step {step} started")
            }
            PipelineEvent::StepCompleted { task_id, step, .. } => {
                write!(f, "[{task_id}] step {step} completed")
            }
            PipelineEvent::StepFailed {
                task_id,
                step,
                error,
                ..
            } => write!(f, "[{task_id}] step {step} failed: {error}"),
            PipelineEvent::ConceptStarted {
                task_id,
                concept_id,
                content_type,
                ..
            } => write!(f, "[{task_id}] {concept_id}/{content_type} started"),
            PipelineEvent::ConceptCompleted {
                task_id,
                concept_id,
                content_type,
                ..
            } => write!(f, "[{task_id}] {concept_id}/{content_type} completed"),
            PipelineEvent::ConceptFailed {
                task_id,
                concept_id,
                content_type,
                error,
                ..
            } => write!(f, "[{task_id}] {concept_id}/{content_type} failed: {error}"),
            PipelineEvent::TaskCompleted {
                task_id, status, ..
            } => write!(f, "[{task_id}] task finished: {status}"),
            PipelineEvent::TaskFailed { task_id, error, .. } => {
                write!(f, "[{task_id}] task failed: {error}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concept_completed_wire_shape() {
        let event = PipelineEvent::concept_completed("t1", "c9", ContentKind::Quiz);
        let json = event.to_json_value();
        assert_eq!(json["type"], "concept_completed");
        assert_eq!(json["task_id"], "t1");
        assert_eq!(json["concept_id"], "c9");
        assert_eq!(json["content_type"], "quiz");
        let ts = json["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[test]
    fn step_events_carry_encoded_step() {
        let event = PipelineEvent::step_started(
            "t1",
            StepKind::Edit(crate::steps::BranchSource::Review),
        );
        let json = event.to_json_value();
        assert_eq!(json["step"], "Edit:review");
    }
}
