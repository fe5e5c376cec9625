// ABOUTME: In-memory registry of background agent tasks, their logs, and cancellation tokens
// ABOUTME: Each task runs detached on its own tokio task; sessions are reused per conversation thread

use crate::runner::{AgentRunner, AgentSession};
use crate::types::{LogEntry, LogSnapshot, Result, Task, TaskError, TaskKind, TaskList, TaskStatus};
use futures::StreamExt;
use refit_core::now_rfc3339;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

const INPUT_PREVIEW_CHARS: usize = 100;

struct TaskEntry {
    task: Task,
    logs: Vec<LogEntry>,
    /// Present only while the task may still be stopped
    cancel: Option<CancellationToken>,
}

/// How an execution ended, before it is written back to the task record
enum Outcome {
    Success,
    Stopped(Option<String>),
    Failed(anyhow::Error),
}

pub struct TaskRegistry {
    runner: Arc<dyn AgentRunner>,
    tasks: RwLock<HashMap<String, TaskEntry>>,
    sessions: Mutex<HashMap<(TaskKind, String), Arc<dyn AgentSession>>>,
    /// One in-flight execution per conversation thread
    thread_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TaskRegistry {
    pub fn new(runner: Arc<dyn AgentRunner>) -> Arc<Self> {
        Arc::new(Self {
            runner,
            tasks: RwLock::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            thread_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Record a PENDING task and schedule it; returns without waiting for execution
    ///
    /// Runs without a thread id get `refactor-{task_id}`; chats must name their thread.
    pub async fn submit(
        self: &Arc<Self>,
        kind: TaskKind,
        input: String,
        thread_id: Option<String>,
    ) -> Result<Task> {
        self.submit_inner(kind, input, thread_id, None).await
    }

    async fn submit_inner(
        self: &Arc<Self>,
        kind: TaskKind,
        input: String,
        thread_id: Option<String>,
        resumed_from: Option<String>,
    ) -> Result<Task> {
        if input.trim().is_empty() {
            return Err(TaskError::Validation(match kind {
                TaskKind::Run => "spec must not be empty".to_string(),
                TaskKind::Chat => "message must not be empty".to_string(),
            }));
        }

        let task_id = Uuid::new_v4().to_string();
        let thread_id = match (kind, thread_id.filter(|t| !t.trim().is_empty())) {
            (_, Some(thread_id)) => thread_id,
            (TaskKind::Run, None) => format!("refactor-{}", task_id),
            (TaskKind::Chat, None) => {
                return Err(TaskError::Validation("thread_id is required for chat".to_string()))
            }
        };

        let task = Task {
            task_id: task_id.clone(),
            thread_id,
            kind,
            status: TaskStatus::Pending,
            input,
            created_at: now_rfc3339(),
            started_at: None,
            finished_at: None,
            error_message: None,
            resumed_from,
        };
        let cancel = CancellationToken::new();

        let mut logs = Vec::new();
        if let Some(previous) = &task.resumed_from {
            push_log(&task_id, &mut logs, format!("Resumed from task {}", previous));
        }

        self.tasks.write().await.insert(
            task_id.clone(),
            TaskEntry {
                task: task.clone(),
                logs,
                cancel: Some(cancel.clone()),
            },
        );
        info!(task_id = %task_id, thread_id = %task.thread_id, kind = kind.as_str(), "Task submitted");

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let worker = tokio::spawn(Arc::clone(&registry).execute(task_id.clone(), cancel));
            if let Err(join_error) = worker.await {
                error!(task_id = %task_id, error = %join_error, "Task worker aborted");
                registry
                    .finish(
                        &task_id,
                        Outcome::Failed(anyhow::anyhow!("task worker aborted: {}", join_error)),
                    )
                    .await;
            }
        });

        Ok(task)
    }

    pub async fn get(&self, task_id: &str) -> Result<Task> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .map(|entry| entry.task.clone())
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))
    }

    /// All tasks, oldest first
    pub async fn list(&self) -> TaskList {
        let mut tasks: Vec<Task> = self
            .tasks
            .read()
            .await
            .values()
            .map(|entry| entry.task.clone())
            .collect();
        tasks.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        TaskList {
            total: tasks.len(),
            tasks,
        }
    }

    pub async fn logs(&self, task_id: &str) -> Result<Vec<LogEntry>> {
        Ok(self.logs_since(task_id, 0).await?.entries)
    }

    /// Entries at or after `cursor`, read under the same lock as the task state
    ///
    /// A snapshot whose task is terminal is guaranteed to hold every entry the task
    /// will ever have.
    pub async fn logs_since(&self, task_id: &str, cursor: usize) -> Result<LogSnapshot> {
        let tasks = self.tasks.read().await;
        let entry = tasks
            .get(task_id)
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;
        Ok(LogSnapshot {
            entries: entry.logs.get(cursor..).unwrap_or_default().to_vec(),
            task: entry.task.clone(),
        })
    }

    /// Request a stop; returns immediately
    ///
    /// A PENDING task goes straight to STOPPED and never runs. A RUNNING task stops at
    /// its next cancellation check.
    pub async fn stop(&self, task_id: &str) -> Result<Task> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks
            .get_mut(task_id)
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;

        if !entry.task.status.can_stop() {
            return Err(TaskError::InvalidState {
                task_id: task_id.to_string(),
                status: entry.task.status,
                action: "stop",
            });
        }

        if let Some(cancel) = &entry.cancel {
            cancel.cancel();
        }
        push_log(task_id, &mut entry.logs, "Stop signal received".to_string());

        if entry.task.status == TaskStatus::Pending {
            entry.task.status = TaskStatus::Stopped;
            entry.task.finished_at = Some(now_rfc3339());
            entry.cancel = None;
            push_log(task_id, &mut entry.logs, "Task stopped before it started".to_string());
        }

        info!(task_id, status = %entry.task.status, "Stop requested");
        Ok(entry.task.clone())
    }

    /// Start a new task on the same thread with the same input as a stopped or failed one
    pub async fn resume(self: &Arc<Self>, task_id: &str) -> Result<Task> {
        let previous = self.get(task_id).await?;
        if !previous.status.can_resume() {
            return Err(TaskError::InvalidState {
                task_id: task_id.to_string(),
                status: previous.status,
                action: "resume",
            });
        }

        let task = self
            .submit_inner(
                previous.kind,
                previous.input.clone(),
                Some(previous.thread_id.clone()),
                Some(previous.task_id.clone()),
            )
            .await?;
        info!(task_id = %task.task_id, old_task_id = %task_id, thread_id = %task.thread_id, "Task resumed");
        Ok(task)
    }

    async fn append_log(&self, task_id: &str, message: impl Into<String>) {
        let mut tasks = self.tasks.write().await;
        if let Some(entry) = tasks.get_mut(task_id) {
            push_log(task_id, &mut entry.logs, message.into());
        }
    }

    async fn lock_thread(&self, thread_id: &str) -> Arc<Mutex<()>> {
        self.thread_locks
            .lock()
            .await
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn session_for(&self, kind: TaskKind, thread_id: &str, task_id: &str) -> anyhow::Result<Arc<dyn AgentSession>> {
        let key = (kind, thread_id.to_string());
        let existing = self.sessions.lock().await.get(&key).cloned();
        if let Some(session) = existing {
            self.append_log(task_id, "Reusing existing agent session").await;
            return Ok(session);
        }

        self.append_log(task_id, format!("Opening {} agent session", kind.as_str()))
            .await;
        let session = self.runner.open_session(kind, thread_id).await?;
        self.sessions.lock().await.insert(key, Arc::clone(&session));
        self.append_log(task_id, "Agent session ready").await;
        Ok(session)
    }

    /// Move PENDING to RUNNING; `None` if the task was stopped while queued
    async fn mark_running(&self, task_id: &str) -> Option<Task> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks.get_mut(task_id)?;
        if entry.task.status != TaskStatus::Pending {
            return None;
        }
        entry.task.status = TaskStatus::Running;
        entry.task.started_at = Some(now_rfc3339());
        let message = format!("Starting agent (thread: {})", entry.task.thread_id);
        push_log(task_id, &mut entry.logs, message);
        Some(entry.task.clone())
    }

    async fn execute(self: Arc<Self>, task_id: String, cancel: CancellationToken) {
        let Ok(task) = self.get(&task_id).await else {
            return;
        };

        // Queue behind any earlier task on the same thread
        let lock = self.lock_thread(&task.thread_id).await;
        let _thread_guard: OwnedMutexGuard<()> = tokio::select! {
            guard = lock.lock_owned() => guard,
            _ = cancel.cancelled() => return,
        };

        let Some(task) = self.mark_running(&task_id).await else {
            return;
        };

        let outcome = self.drive(&task, &cancel).await;
        self.finish(&task_id, outcome).await;
    }

    async fn drive(&self, task: &Task, cancel: &CancellationToken) -> Outcome {
        let task_id = task.task_id.as_str();

        if cancel.is_cancelled() {
            self.append_log(task_id, "Task stopped before initialization").await;
            return Outcome::Stopped(None);
        }

        let session = match self.session_for(task.kind, &task.thread_id, task_id).await {
            Ok(session) => session,
            Err(e) => return Outcome::Failed(e),
        };

        if cancel.is_cancelled() {
            self.append_log(task_id, "Task stopped after session initialization")
                .await;
            return Outcome::Stopped(None);
        }

        let preview: String = task.input.chars().take(INPUT_PREVIEW_CHARS).collect();
        self.append_log(task_id, format!("Running agent: {}", preview))
            .await;

        let mut events = match session.run(&task.input, cancel.clone()).await {
            Ok(events) => events,
            Err(e) => return Outcome::Failed(e),
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                next = events.next() => Some(next),
            };

            match next {
                None => {
                    self.append_log(task_id, "Stop signal detected, interrupting agent")
                        .await;
                    return Outcome::Stopped(Some(stopped_message(task.kind)));
                }
                Some(None) => break,
                Some(Some(Ok(event))) => {
                    if cancel.is_cancelled() {
                        self.append_log(task_id, "Stop signal detected, interrupting agent")
                            .await;
                        return Outcome::Stopped(Some(stopped_message(task.kind)));
                    }
                    self.append_log(task_id, event.to_log_line()).await;
                }
                Some(Some(Err(e))) => return Outcome::Failed(e),
            }
        }

        if cancel.is_cancelled() {
            self.append_log(task_id, "Agent run was stopped").await;
            Outcome::Stopped(None)
        } else {
            Outcome::Success
        }
    }

    async fn finish(&self, task_id: &str, outcome: Outcome) {
        let mut tasks = self.tasks.write().await;
        let Some(entry) = tasks.get_mut(task_id) else {
            return;
        };
        if entry.task.status.is_terminal() {
            return;
        }

        match outcome {
            Outcome::Success => {
                entry.task.status = TaskStatus::Success;
                push_log(task_id, &mut entry.logs, "Agent run completed".to_string());
            }
            Outcome::Stopped(message) => {
                entry.task.status = TaskStatus::Stopped;
                entry.task.error_message = message;
                push_log(task_id, &mut entry.logs, "Task stopped by user".to_string());
            }
            Outcome::Failed(e) => {
                let message = format!("{} execution failed: {}", kind_label(entry.task.kind), e);
                error!(task_id, error = %message, "Task failed");
                push_log(task_id, &mut entry.logs, format!("Error: {}", message));
                push_log(task_id, &mut entry.logs, format!("Traceback: {:?}", e));
                entry.task.status = TaskStatus::Failed;
                entry.task.error_message = Some(message);
            }
        }

        entry.task.finished_at = Some(now_rfc3339());
        entry.cancel = None;
    }
}

fn push_log(task_id: &str, logs: &mut Vec<LogEntry>, message: String) {
    info!(task_id, "{}", message);
    logs.push(LogEntry {
        timestamp: now_rfc3339(),
        message,
    });
}

fn kind_label(kind: TaskKind) -> &'static str {
    match kind {
        TaskKind::Run => "Agent",
        TaskKind::Chat => "Chat",
    }
}

fn stopped_message(kind: TaskKind) -> String {
    match kind {
        TaskKind::Run => "Task stopped by user".to_string(),
        TaskKind::Chat => "Chat stopped by user".to_string(),
    }
}
