// ABOUTME: SandboxRuntime trait and shared types for per-project sandbox containers
// ABOUTME: Defines the contract the orchestrator drives and the error kinds it classifies

use crate::files::{FileContent, FileNode};
use crate::sanitize::SanitizeError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Validation failed: {0}")]
    Validation(#[from] SanitizeError),

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Path not found in sandbox: {0}")]
    PathNotFound(String),

    #[error("Not a regular file: {0}")]
    NotAFile(String),

    #[error("File too large: {size} bytes exceeds limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("{operation} failed (exit code {code:?}): {message}")]
    CommandFailed {
        operation: String,
        code: Option<i32>,
        message: String,
    },

    #[error("{operation} timed out after {timeout_secs}s")]
    Timeout {
        operation: String,
        timeout_secs: u64,
    },

    #[error("Failed to run container runtime: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse runtime output: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Result of a command executed inside a sandbox
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Live container state as reported by the runtime; never authoritative
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservedContainer {
    pub id: String,
    pub name: String,
    pub status: String,
    pub image: String,
}

/// Parameters for creating a project sandbox
#[derive(Debug, Clone, Default)]
pub struct CreateRequest {
    pub project_id: String,
    /// Falls back to the runtime's configured image
    pub image: Option<String>,
    /// Injected once at creation; the runtime validates names and values
    pub env: HashMap<String, String>,
}

/// Stream of container output lines, ended when the container log ends
pub type LogLines = BoxStream<'static, Result<String>>;

/// Container runtime driven by the project orchestrator
///
/// `stop` and `remove` treat an absent container as already satisfied. Every method
/// that puts caller input on a command line validates it first and fails with
/// [`RuntimeError::Validation`] without spawning anything.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Prepare host directories and create (not start) the project's container
    async fn create(&self, request: &CreateRequest) -> Result<String>;

    /// Start a created container, optionally waiting until it answers `echo ready`
    async fn start(&self, container_id: &str, wait_ready: bool) -> Result<()>;

    async fn stop(&self, container_id: &str, timeout: Duration) -> Result<()>;

    async fn remove(&self, container_id: &str, force: bool) -> Result<()>;

    /// `Ok(None)` when the runtime has no such container
    async fn inspect(&self, container_id: &str) -> Result<Option<ObservedContainer>>;

    async fn clone_repository(
        &self,
        container_id: &str,
        repo_url: &str,
        branch: &str,
        target_dir: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecOutput>;

    /// Seed the memory directory a SANDBOX project starts from
    async fn seed_memory_scaffold(&self, project_id: &str, spec: &str) -> Result<()>;

    /// Run a trusted command string through `sh -c`; a non-zero exit is returned, not raised
    async fn exec(
        &self,
        container_id: &str,
        command: &str,
        workdir: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ExecOutput>;

    async fn list_files(
        &self,
        container_id: &str,
        path: &str,
        exclude_patterns: &[String],
    ) -> Result<FileNode>;

    async fn read_file(
        &self,
        container_id: &str,
        path: &str,
        max_size: Option<u64>,
    ) -> Result<FileContent>;

    async fn stream_logs(&self, container_id: &str, follow: bool, tail: usize) -> Result<LogLines>;
}
