// ABOUTME: Contract between the task registry and the agent that does the work
// ABOUTME: A runner opens long-lived sessions per conversation; a session streams events per input

use crate::types::TaskKind;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One progress event emitted by the agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentEvent {
    pub event_type: String,
    pub data: serde_json::Value,
}

impl AgentEvent {
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }

    /// Render as a task log line: `[event_type] <json>`
    pub fn to_log_line(&self) -> String {
        format!("[{}] {}", self.event_type, self.data)
    }
}

pub type AgentEventStream = BoxStream<'static, anyhow::Result<AgentEvent>>;

/// Long-lived execution context bound to one conversation thread
#[async_trait]
pub trait AgentSession: Send + Sync {
    /// Start processing `input`
    ///
    /// `cancel` belongs to the task being executed now, not to the task that opened
    /// the session. Implementations should stop producing events once it fires.
    async fn run(&self, input: &str, cancel: CancellationToken) -> anyhow::Result<AgentEventStream>;
}

#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn open_session(
        &self,
        kind: TaskKind,
        thread_id: &str,
    ) -> anyhow::Result<Arc<dyn AgentSession>>;
}
