//! Run result types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::agents::AgentId;
use crate::error::{Error, ErrorKind};
use crate::message::{ErrorPayload, Message};
use crate::plan::{DelegationPlan, SubtaskId, TaskId};

/// Unique identifier for a run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl Default for RunId {
    fn default() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    PartialFailure,
    /// The task could not be planned; nothing ran
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::PartialFailure => write!(f, "partial_failure"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Subtask status. `Pending` and `Running` never appear in a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl SubtaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

/// Outcome of one subtask
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskReport {
    pub id: SubtaskId,
    pub capability: String,
    pub agent: AgentId,
    pub status: SubtaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
    /// Why the subtask was skipped (`dependency_failed: <id>`, `cancelled`, `abandoned`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Output of one succeeded subtask, in plan order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedOutput {
    pub subtask: SubtaskId,
    pub capability: String,
    pub output: JsonValue,
}

/// Why a run could not start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for RunFailure {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Terminal artifact of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: RunId,
    pub task_id: TaskId,
    pub status: RunStatus,
    /// The run was cancelled externally
    pub cancelled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<DelegationPlan>,
    /// Per-subtask outcome, in plan order
    pub subtasks: Vec<SubtaskReport>,
    pub outputs: Vec<MergedOutput>,
    pub transcript: Vec<Message>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    /// Result for a task the coordinator could not plan
    pub fn planning_failed(
        run_id: RunId,
        task_id: TaskId,
        err: &Error,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id,
            task_id,
            status: RunStatus::Failed,
            cancelled: false,
            failure: Some(RunFailure::from(err)),
            plan: None,
            subtasks: vec![],
            outputs: vec![],
            transcript: vec![],
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn subtask(&self, id: &SubtaskId) -> Option<&SubtaskReport> {
        self.subtasks.iter().find(|s| &s.id == id)
    }

    /// First subtask exercising `capability`
    pub fn by_capability(&self, capability: &str) -> Option<&SubtaskReport> {
        self.subtasks.iter().find(|s| s.capability == capability)
    }

    pub fn count(&self, status: SubtaskStatus) -> usize {
        self.subtasks.iter().filter(|s| s.status == status).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_planning_failed_result() {
        let err = Error::UnsatisfiableTask {
            capability: "visualize".into(),
            reason: "has no registered visualization agent".into(),
        };
        let result = RunResult::planning_failed(RunId::default(), TaskId::default(), &err, Utc::now());

        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.subtasks.is_empty());
        let failure = result.failure.as_ref().unwrap();
        assert_eq!(failure.kind, ErrorKind::UnsatisfiableTask);
        assert!(failure.message.contains("visualize"));
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_string(&RunStatus::PartialFailure).unwrap(), "\"partial_failure\"");
        assert_eq!(serde_json::to_string(&SubtaskStatus::Skipped).unwrap(), "\"skipped\"");
        assert_eq!(RunStatus::Success.to_string(), "success");
        assert!(!SubtaskStatus::Running.is_terminal());
    }
}
