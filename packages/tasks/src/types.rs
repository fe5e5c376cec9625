// ABOUTME: Task type definitions for background agent executions
// ABOUTME: Status, kind, log entries, and the task record exposed over the API

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Execution state of a background task; serialized lowercase on the wire
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
    Stopped,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
            TaskStatus::Stopped => "stopped",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Some(TaskStatus::Pending),
            "running" => Some(TaskStatus::Running),
            "success" => Some(TaskStatus::Success),
            "failed" => Some(TaskStatus::Failed),
            "stopped" => Some(TaskStatus::Stopped),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failed | TaskStatus::Stopped
        )
    }

    pub fn can_stop(&self) -> bool {
        matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }

    pub fn can_resume(&self) -> bool {
        matches!(self, TaskStatus::Stopped | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a task asks the agent to do
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Work through a refactoring spec
    #[default]
    Run,
    /// Answer one message of an ongoing conversation
    Chat,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Run => "run",
            TaskKind::Chat => "chat",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub task_id: String,
    pub thread_id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    /// Spec for runs, message for chats
    pub input: String,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_from: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskList {
    pub total: usize,
    pub tasks: Vec<Task>,
}

/// Log entries past a cursor together with the task state they were read with
#[derive(Debug, Clone)]
pub struct LogSnapshot {
    pub entries: Vec<LogEntry>,
    pub task: Task,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Cannot {action} task {task_id} in status {status}")]
    InvalidState {
        task_id: String,
        status: TaskStatus,
        action: &'static str,
    },

    #[error("Validation failed: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, TaskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_format_is_lowercase() {
        assert_eq!(
            serde_json::to_value(TaskStatus::Success).unwrap(),
            serde_json::json!("success")
        );
        assert_eq!(TaskStatus::from_str("STOPPED"), Some(TaskStatus::Stopped));
        assert_eq!(TaskStatus::from_str("done"), None);
    }

    #[test]
    fn test_transition_guards() {
        assert!(TaskStatus::Pending.can_stop());
        assert!(TaskStatus::Running.can_stop());
        assert!(!TaskStatus::Success.can_stop());
        assert!(TaskStatus::Failed.can_resume());
        assert!(!TaskStatus::Running.can_resume());
        assert!(!TaskStatus::Running.is_terminal());
    }
}
