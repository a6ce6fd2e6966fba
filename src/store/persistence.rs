/*!
Serde-friendly persisted shapes for task rows and checkpoints, shared by
the SQLite backend and any future persistent store.

Design Goals:
- Keep the serialized shapes decoupled from the in-memory types so the
  store code stays lean and declarative.
- Localize conversion logic in From / TryFrom impls.
- Store step and status identities as their stable string encodings
  rather than serde enum tags, so rows stay greppable in the database.

This module does NO I/O; it is pure data transformation.
*/

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{ExecutionSummary, Task, TaskStatus};
use crate::state::TaskState;
use crate::steps::{BranchSource, StepKind};
use crate::store::StepCheckpoint;

/// Conversion and (de)serialization errors for persisted shapes.
#[derive(Debug, Error, Diagnostic)]
pub enum PersistenceError {
    #[error("unknown step encoding: {0}")]
    #[diagnostic(
        code(courseforge::persistence::unknown_step),
        help("The step column holds a value this version cannot decode.")
    )]
    UnknownStep(String),

    #[error("unknown status encoding: {0}")]
    #[diagnostic(code(courseforge::persistence::unknown_status))]
    UnknownStatus(String),

    #[error("unknown branch encoding: {0}")]
    #[diagnostic(code(courseforge::persistence::unknown_branch))]
    UnknownBranch(String),

    #[error("invalid RFC3339 timestamp: {0}")]
    #[diagnostic(
        code(courseforge::persistence::invalid_timestamp),
        help("Timestamp columns must hold RFC3339 strings.")
    )]
    InvalidTimestamp(String),

    #[error("JSON serialization/deserialization failed: {source}")]
    #[diagnostic(code(courseforge::persistence::serde))]
    Serde {
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Persisted shape of a task row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedTask {
    pub id: String,
    pub owner: String,
    /// Stable string form of [`TaskStatus`].
    pub status: String,
    /// Stable string form of [`StepKind`] via `encode()`.
    pub current_step: String,
    pub branch_source: Option<String>,
    pub roadmap_id: Option<String>,
    /// RFC3339 timestamps (keeps chrono out of the serialized shape).
    pub created_at: String,
    pub updated_at: String,
    #[serde(default)]
    pub summary: ExecutionSummary,
}

impl From<&Task> for PersistedTask {
    fn from(task: &Task) -> Self {
        PersistedTask {
            id: task.id.clone(),
            owner: task.owner.clone(),
            status: task.status.as_str().to_string(),
            current_step: task.current_step.encode(),
            branch_source: task.branch_source.map(|b| b.as_str().to_string()),
            roadmap_id: task.roadmap_id.clone(),
            created_at: task.created_at.to_rfc3339(),
            updated_at: task.updated_at.to_rfc3339(),
            summary: task.summary.clone(),
        }
    }
}

impl TryFrom<PersistedTask> for Task {
    type Error = PersistenceError;

    fn try_from(p: PersistedTask) -> Result<Self> {
        let status = TaskStatus::parse(&p.status)
            .ok_or_else(|| PersistenceError::UnknownStatus(p.status.clone()))?;
        let current_step = StepKind::decode(&p.current_step)
            .ok_or_else(|| PersistenceError::UnknownStep(p.current_step.clone()))?;
        let branch_source = match &p.branch_source {
            Some(s) => Some(
                BranchSource::parse(s)
                    .ok_or_else(|| PersistenceError::UnknownBranch(s.clone()))?,
            ),
            None => None,
        };
        Ok(Task {
            id: p.id,
            owner: p.owner,
            status,
            current_step,
            branch_source,
            roadmap_id: p.roadmap_id,
            created_at: parse_rfc3339(&p.created_at)?,
            updated_at: parse_rfc3339(&p.updated_at)?,
            summary: p.summary,
        })
    }
}

/// Persisted shape of a step checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedCheckpoint {
    pub task_id: String,
    /// Last completed step, `StepKind::encode()` form.
    pub step: String,
    pub state: TaskState,
    pub created_at: String,
}

impl From<&StepCheckpoint> for PersistedCheckpoint {
    fn from(cp: &StepCheckpoint) -> Self {
        PersistedCheckpoint {
            task_id: cp.task_id.clone(),
            step: cp.step.encode(),
            state: cp.state.clone(),
            created_at: cp.created_at.to_rfc3339(),
        }
    }
}

impl TryFrom<PersistedCheckpoint> for StepCheckpoint {
    type Error = PersistenceError;

    fn try_from(p: PersistedCheckpoint) -> Result<Self> {
        let step = StepKind::decode(&p.step)
            .ok_or_else(|| PersistenceError::UnknownStep(p.step.clone()))?;
        Ok(StepCheckpoint {
            task_id: p.task_id,
            step,
            state: p.state,
            created_at: parse_rfc3339(&p.created_at)?,
        })
    }
}

pub fn to_json_string<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|source| PersistenceError::Serde { source })
}

pub fn from_json_str<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T> {
    serde_json::from_str(s).map_err(|source| PersistenceError::Serde { source })
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| PersistenceError::InvalidTimestamp(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_round_trip() {
        let mut task = Task::new("alice");
        task.current_step = StepKind::Edit(BranchSource::Review);
        task.branch_source = Some(BranchSource::Review);
        task.roadmap_id = Some("rm-1".into());

        let persisted = PersistedTask::from(&task);
        assert_eq!(persisted.current_step, "Edit:review");
        let restored = Task::try_from(persisted).unwrap();
        assert_eq!(restored.current_step, task.current_step);
        assert_eq!(restored.branch_source, task.branch_source);
        assert_eq!(restored.status, task.status);
    }

    #[test]
    fn unknown_step_is_an_error() {
        let mut persisted = PersistedTask::from(&Task::new("alice"));
        persisted.current_step = "Mystery".into();
        assert!(matches!(
            Task::try_from(persisted),
            Err(PersistenceError::UnknownStep(_))
        ));
    }

    #[test]
    fn corrupt_timestamp_is_an_error() {
        let mut persisted = PersistedTask::from(&Task::new("alice"));
        persisted.created_at = "last tuesday".into();
        assert!(matches!(
            Task::try_from(persisted),
            Err(PersistenceError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn checkpoint_round_trip() {
        let cp = StepCheckpoint::new("t-1", StepKind::Validate, TaskState::new());
        let json = to_json_string(&PersistedCheckpoint::from(&cp)).unwrap();
        let restored: PersistedCheckpoint = from_json_str(&json).unwrap();
        let restored = StepCheckpoint::try_from(restored).unwrap();
        assert_eq!(restored.task_id, "t-1");
        assert_eq!(restored.step, StepKind::Validate);
    }
}
