// ABOUTME: TaskService backed by an in-process TaskRegistry
// ABOUTME: Streams task logs by polling the registry with a cursor until the task is terminal

use crate::frame::{classify_entry, RelayFrame};
use crate::service::{FrameStream, ResumeAck, Result, StopAck, SubmitAck, TaskService};
use async_stream::stream;
use async_trait::async_trait;
use refit_tasks::{Task, TaskKind, TaskList, TaskRegistry, TaskStatus};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub const POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const PING_INTERVAL: Duration = Duration::from_secs(15);

pub struct LocalTaskService {
    registry: Arc<TaskRegistry>,
    poll_interval: Duration,
    ping_interval: Duration,
}

impl LocalTaskService {
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self {
            registry,
            poll_interval: POLL_INTERVAL,
            ping_interval: PING_INTERVAL,
        }
    }

    pub fn with_intervals(mut self, poll_interval: Duration, ping_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.ping_interval = ping_interval;
        self
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }
}

#[async_trait]
impl TaskService for LocalTaskService {
    async fn submit(
        &self,
        kind: TaskKind,
        input: String,
        thread_id: Option<String>,
    ) -> Result<SubmitAck> {
        let task = self.registry.submit(kind, input, thread_id).await?;
        let message = match kind {
            TaskKind::Run => "Agent task started in background",
            TaskKind::Chat => "Chat task started in background",
        };
        Ok(SubmitAck {
            task_id: task.task_id,
            thread_id: task.thread_id,
            status: task.status.to_string(),
            message: message.to_string(),
        })
    }

    async fn get(&self, task_id: &str) -> Result<Task> {
        Ok(self.registry.get(task_id).await?)
    }

    async fn list(&self) -> Result<TaskList> {
        Ok(self.registry.list().await)
    }

    async fn stream(&self, task_id: &str) -> Result<FrameStream> {
        self.registry.get(task_id).await?;

        let registry = Arc::clone(&self.registry);
        let task_id = task_id.to_string();
        let poll_interval = self.poll_interval;
        let ping_interval = self.ping_interval;

        let frames = stream! {
            let mut cursor = 0usize;
            let mut idle = Duration::ZERO;

            loop {
                // Tasks are never removed, so this only fails for ids we already checked
                let Ok(snapshot) = registry.logs_since(&task_id, cursor).await else {
                    break;
                };

                if !snapshot.entries.is_empty() {
                    idle = Duration::ZERO;
                }
                cursor += snapshot.entries.len();
                for entry in &snapshot.entries {
                    yield classify_entry(entry);
                }

                if snapshot.task.status.is_terminal() {
                    debug!(task_id = %task_id, delivered = cursor, "Task stream finished");
                    yield RelayFrame::status(&snapshot.task);
                    break;
                }

                if idle >= ping_interval {
                    idle = Duration::ZERO;
                    yield RelayFrame::ping();
                }

                tokio::time::sleep(poll_interval).await;
                idle += poll_interval;
            }
        };

        Ok(Box::pin(frames))
    }

    async fn stop(&self, task_id: &str) -> Result<StopAck> {
        let task = self.registry.stop(task_id).await?;
        let (status, message) = if task.status == TaskStatus::Stopped {
            ("stopped", "Task stopped before it started")
        } else {
            ("stopping", "Stop signal sent, task will be interrupted")
        };
        Ok(StopAck {
            task_id: task.task_id,
            status: status.to_string(),
            message: message.to_string(),
        })
    }

    async fn resume(&self, task_id: &str) -> Result<ResumeAck> {
        let task = self.registry.resume(task_id).await?;
        info!(task_id = %task.task_id, old_task_id = %task_id, "Resumed task");
        Ok(ResumeAck {
            task_id: task.task_id,
            old_task_id: task_id.to_string(),
            thread_id: task.thread_id,
            status: task.status.to_string(),
            message: "Task resumed with new task_id".to_string(),
        })
    }
}
