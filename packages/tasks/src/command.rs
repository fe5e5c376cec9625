// ABOUTME: AgentRunner that drives an external agent executable over NDJSON
// ABOUTME: Input goes to stdin, events come back one JSON object per stdout line

use crate::runner::{AgentEvent, AgentEventStream, AgentRunner, AgentSession};
use crate::types::TaskKind;
use anyhow::{anyhow, Context};
use async_stream::stream;
use async_trait::async_trait;
use refit_core::constants::{REFIT_CONTAINER_ID, REFIT_PROJECT_ID, REFIT_WORKSPACE};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const STDERR_TAIL_LINES: usize = 20;

/// Convert one stdout line into an event
///
/// Lines of the form `{"type": "...", ...}` become that event with the remaining
/// fields as data; anything else is wrapped as an `output` event.
pub fn parse_event_line(line: &str) -> Option<AgentEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    match serde_json::from_str::<serde_json::Value>(line) {
        Ok(serde_json::Value::Object(mut object)) => {
            let event_type = match object.remove("type") {
                Some(serde_json::Value::String(event_type)) => event_type,
                _ => "output".to_string(),
            };
            Some(AgentEvent::new(event_type, serde_json::Value::Object(object)))
        }
        _ => Some(AgentEvent::new(
            "output",
            serde_json::json!({ "text": line }),
        )),
    }
}

#[derive(Debug, Clone)]
pub struct CommandAgentRunner {
    program: PathBuf,
    args: Vec<String>,
    env: HashMap<String, String>,
    current_dir: Option<PathBuf>,
}

impl CommandAgentRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
            current_dir: None,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Copy of this runner bound to one project's sandbox
    ///
    /// The agent starts in the host side of the sandbox workspace and learns the
    /// container it should exec into from `REFIT_CONTAINER_ID`.
    pub fn for_sandbox(
        &self,
        project_id: &str,
        container_id: &str,
        workspace: impl Into<PathBuf>,
    ) -> Self {
        let workspace = workspace.into();
        let mut runner = self.clone();
        runner.env.insert(REFIT_PROJECT_ID.to_string(), project_id.to_string());
        runner.env.insert(REFIT_CONTAINER_ID.to_string(), container_id.to_string());
        runner
            .env
            .insert(REFIT_WORKSPACE.to_string(), workspace.to_string_lossy().into_owned());
        runner.current_dir = Some(workspace);
        runner
    }
}

#[async_trait]
impl AgentRunner for CommandAgentRunner {
    async fn open_session(
        &self,
        kind: TaskKind,
        thread_id: &str,
    ) -> anyhow::Result<Arc<dyn AgentSession>> {
        Ok(Arc::new(CommandSession {
            program: self.program.clone(),
            args: self.args.clone(),
            env: self.env.clone(),
            current_dir: self.current_dir.clone(),
            kind,
            thread_id: thread_id.to_string(),
        }))
    }
}

/// One agent process per input; conversation state lives with the agent, keyed by thread
struct CommandSession {
    program: PathBuf,
    args: Vec<String>,
    env: HashMap<String, String>,
    current_dir: Option<PathBuf>,
    kind: TaskKind,
    thread_id: String,
}

#[async_trait]
impl AgentSession for CommandSession {
    async fn run(&self, input: &str, cancel: CancellationToken) -> anyhow::Result<AgentEventStream> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("--thread-id")
            .arg(&self.thread_id)
            .arg("--mode")
            .arg(self.kind.as_str())
            .envs(&self.env);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn agent {}", self.program.display()))?;

        debug!(thread_id = %self.thread_id, pid = ?child.id(), "Spawned agent process");

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(input.as_bytes())
                .await
                .context("failed to send input to agent")?;
            // Dropping stdin closes it so the agent sees end of input
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("agent stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("agent stderr not captured"))?;

        let stderr_reader = tokio::spawn(async move {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            tail.into_iter().collect::<Vec<_>>().join("\n")
        });

        let thread_id = self.thread_id.clone();
        let events = stream! {
            let mut child = child;
            let mut lines = BufReader::new(stdout).lines();

            loop {
                let line = tokio::select! {
                    _ = cancel.cancelled() => {
                        if let Err(e) = child.kill().await {
                            warn!(thread_id = %thread_id, error = %e, "Failed to kill agent process");
                        }
                        return;
                    }
                    line = lines.next_line() => line,
                };

                match line {
                    Ok(Some(line)) => {
                        if let Some(event) = parse_event_line(&line) {
                            yield Ok(event);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(anyhow!(e).context("failed to read agent output"));
                        return;
                    }
                }
            }

            let status = match child.wait().await {
                Ok(status) => status,
                Err(e) => {
                    yield Err(anyhow!(e).context("failed to wait for agent"));
                    return;
                }
            };

            if !status.success() {
                let stderr_tail = stderr_reader.await.unwrap_or_default();
                yield Err(anyhow!("agent exited with {}: {}", status, stderr_tail.trim()));
            }
        };

        Ok(Box::pin(events))
    }
}
