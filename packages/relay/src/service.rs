// ABOUTME: TaskService trait shared by the in-process and HTTP-backed task services
// ABOUTME: Also defines the acknowledgement bodies exchanged with the agent server

use crate::frame::RelayFrame;
use async_trait::async_trait;
use futures::stream::BoxStream;
use refit_tasks::{Task, TaskError, TaskKind, TaskList};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type FrameStream = BoxStream<'static, RelayFrame>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    Validation(String),

    #[error("Agent server unavailable: {0}")]
    Unavailable(String),

    #[error("Agent server returned {status}: {message}")]
    Upstream { status: u16, message: String },
}

impl From<TaskError> for ServiceError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::NotFound(_) => ServiceError::NotFound(err.to_string()),
            TaskError::InvalidState { .. } => ServiceError::InvalidState(err.to_string()),
            TaskError::Validation(msg) => ServiceError::Validation(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Reply to `/run` and `/chat`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmitAck {
    pub task_id: String,
    pub thread_id: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StopAck {
    pub task_id: String,
    /// `stopping` while a running task winds down, `stopped` when it never started
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResumeAck {
    pub task_id: String,
    pub old_task_id: String,
    pub thread_id: String,
    pub status: String,
    pub message: String,
}

/// Task operations as seen by an HTTP handler, wherever the tasks actually run
#[async_trait]
pub trait TaskService: Send + Sync {
    async fn submit(
        &self,
        kind: TaskKind,
        input: String,
        thread_id: Option<String>,
    ) -> Result<SubmitAck>;

    async fn get(&self, task_id: &str) -> Result<Task>;

    async fn list(&self) -> Result<TaskList>;

    /// SSE frames for a task, ending after its terminal `status` event
    async fn stream(&self, task_id: &str) -> Result<FrameStream>;

    async fn stop(&self, task_id: &str) -> Result<StopAck>;

    async fn resume(&self, task_id: &str) -> Result<ResumeAck>;
}
