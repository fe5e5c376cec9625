// ABOUTME: Docker CLI implementation of SandboxRuntime using argv-only subprocess calls
// ABOUTME: Every invocation is bounded by a timeout; caller input is sanitized before spawning

use crate::files::{tree_from_find_output, FileContent, FileNode};
use crate::runtime::{
    CreateRequest, ExecOutput, LogLines, ObservedContainer, Result, RuntimeError, SandboxRuntime,
};
use crate::sanitize::{
    sanitize_branch, sanitize_path, sanitize_repo_url, validate_env, validate_exclude_pattern,
    validate_identifier,
};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use refit_core::constants::{SANDBOX_CREDENTIALS_PATH, WORKSPACE_ROOT};
use refit_core::{container_name_for, SandboxDefaults};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Timeout for short control commands (start, stop, rm, inspect, stat)
const CONTROL_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for quick docker calls such as one readiness check
const SHORT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

const READY_CHECK_INTERVAL: Duration = Duration::from_secs(1);

const MAX_TREE_DEPTH: u32 = 10;

/// Git progress lines that show up on stderr even when a clone succeeds
const BENIGN_CLONE_PREFIXES: &[&str] = &[
    "Cloning into",
    "remote: Enumerating objects",
    "remote: Counting objects",
    "remote: Compressing objects",
    "remote: Total",
    "Receiving objects",
    "Resolving deltas",
    "Updating files",
    "Checking out files",
];

fn is_missing_container(stderr: &str) -> bool {
    stderr.contains("No such container") || stderr.contains("No such object")
}

/// Lines of clone output that describe an actual failure
pub fn clone_error_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| {
            !BENIGN_CLONE_PREFIXES
                .iter()
                .any(|prefix| line.starts_with(prefix))
        })
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectEntry {
    id: String,
    name: String,
    state: InspectState,
    config: InspectConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    image: String,
}

/// Parse `docker inspect` output into the observed container summary
pub fn parse_inspect_output(stdout: &str) -> Result<Option<ObservedContainer>> {
    let entries: Vec<InspectEntry> =
        serde_json::from_str(stdout).map_err(|e| RuntimeError::Parse(e.to_string()))?;

    Ok(entries.into_iter().next().map(|entry| ObservedContainer {
        id: entry.id.chars().take(12).collect(),
        name: entry.name.trim_start_matches('/').to_string(),
        status: entry.state.status,
        image: entry.config.image,
    }))
}

/// Sandbox runtime backed by the `docker` command line client
pub struct DockerCli {
    binary: PathBuf,
    defaults: SandboxDefaults,
}

impl DockerCli {
    pub fn new(defaults: SandboxDefaults) -> Self {
        Self {
            binary: PathBuf::from("docker"),
            defaults,
        }
    }

    /// Use a different client executable (podman, or a test double)
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn defaults(&self) -> &SandboxDefaults {
        &self.defaults
    }

    /// Report the daemon version, or `None` when the daemon is unreachable
    pub async fn daemon_version(&self) -> Option<String> {
        let output = self
            .run(
                "docker version",
                &["version", "--format", "{{.Server.Version}}"],
                &[],
                SHORT_COMMAND_TIMEOUT,
            )
            .await
            .ok()?;

        if output.status.success() {
            Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            None
        }
    }

    fn workspace_dir(&self, project_id: &str) -> PathBuf {
        self.defaults.volume_prefix.join(project_id)
    }

    /// Wipe and recreate the repo directory, ensure the artifacts directory exists
    pub async fn prepare_workspace(&self, project_id: &str) -> Result<PathBuf> {
        validate_identifier(project_id)?;
        let workspace = self.workspace_dir(project_id);
        let repo = workspace.join("repo");

        if tokio::fs::try_exists(&repo).await? {
            tokio::fs::remove_dir_all(&repo).await?;
        }
        tokio::fs::create_dir_all(&repo).await?;
        tokio::fs::create_dir_all(workspace.join("artifacts")).await?;

        debug!(project_id, workspace = %workspace.display(), "Prepared sandbox workspace");
        Ok(workspace)
    }

    async fn run(
        &self,
        operation: &str,
        args: &[&str],
        env: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<Output> {
        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in env {
            command.env(key, value);
        }

        debug!(operation, ?args, "Running container runtime command");

        match tokio::time::timeout(timeout, command.output()).await {
            Ok(output) => Ok(output?),
            Err(_) => {
                warn!(operation, timeout_secs = timeout.as_secs(), "Runtime command timed out");
                Err(RuntimeError::Timeout {
                    operation: operation.to_string(),
                    timeout_secs: timeout.as_secs(),
                })
            }
        }
    }

    fn failure(operation: &str, output: &Output) -> RuntimeError {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        } else {
            stderr
        };
        RuntimeError::CommandFailed {
            operation: operation.to_string(),
            code: output.status.code(),
            message,
        }
    }

    async fn docker_create(
        &self,
        name: &str,
        image: &str,
        workspace: &std::path::Path,
        env: &HashMap<String, String>,
    ) -> Result<Output> {
        let memory = self.defaults.memory_limit.clone();
        let cpus = self.defaults.cpu_limit.to_string();
        let volume = format!("{}:{}", workspace.display(), WORKSPACE_ROOT);

        let mut args: Vec<String> = vec![
            "create".into(),
            "--name".into(),
            name.into(),
            "--network".into(),
            self.defaults.network.clone(),
            "-t".into(),
            "-i".into(),
            "--memory".into(),
            memory,
            "--cpus".into(),
            cpus,
            "-v".into(),
            volume,
        ];

        if let Some(credentials) = &self.defaults.credentials_file {
            args.push("-v".into());
            args.push(format!(
                "{}:{}:ro",
                credentials.display(),
                SANDBOX_CREDENTIALS_PATH
            ));
            args.push("-e".into());
            args.push(format!(
                "GOOGLE_APPLICATION_CREDENTIALS={}",
                SANDBOX_CREDENTIALS_PATH
            ));
        }

        // `-e NAME` copies the value from this client's environment, keeping secrets off argv
        let mut names: Vec<&String> = env.keys().collect();
        names.sort();
        for key in &names {
            args.push("-e".into());
            args.push((*key).clone());
        }
        args.push(image.into());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let env_refs: Vec<(&str, &str)> = env
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        self.run("docker create", &arg_refs, &env_refs, CONTROL_TIMEOUT)
            .await
    }

    async fn check_ready(&self, container_id: &str) -> bool {
        match self
            .run(
                "readiness check",
                &["exec", container_id, "echo", "ready"],
                &[],
                SHORT_COMMAND_TIMEOUT,
            )
            .await
        {
            Ok(output) => {
                output.status.success() && String::from_utf8_lossy(&output.stdout).contains("ready")
            }
            Err(_) => false,
        }
    }
}

#[async_trait]
impl SandboxRuntime for DockerCli {
    async fn create(&self, request: &CreateRequest) -> Result<String> {
        validate_identifier(&request.project_id)?;

        let env = &request.env;
        validate_env(env)?;

        let workspace = self.prepare_workspace(&request.project_id).await?;
        let name = container_name_for(&request.project_id);
        let image = request
            .image
            .clone()
            .unwrap_or_else(|| self.defaults.image.clone());

        let mut output = self.docker_create(&name, &image, &workspace, env).await?;

        // A container left behind by an interrupted provision still holds the name
        if !output.status.success()
            && String::from_utf8_lossy(&output.stderr).contains("is already in use")
        {
            warn!(container_name = %name, "Removing leftover container holding the sandbox name");
            self.remove(&name, true).await?;
            output = self.docker_create(&name, &image, &workspace, env).await?;
        }

        if !output.status.success() {
            return Err(Self::failure("docker create", &output));
        }

        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if container_id.is_empty() {
            return Err(RuntimeError::Parse(
                "docker create returned no container id".to_string(),
            ));
        }

        info!(project_id = %request.project_id, container_id = %container_id, image = %image, "Created sandbox container");
        Ok(container_id)
    }

    async fn start(&self, container_id: &str, wait_ready: bool) -> Result<()> {
        let output = self
            .run("docker start", &["start", container_id], &[], CONTROL_TIMEOUT)
            .await?;

        if !output.status.success() {
            if is_missing_container(&String::from_utf8_lossy(&output.stderr)) {
                return Err(RuntimeError::ContainerNotFound(container_id.to_string()));
            }
            return Err(Self::failure("docker start", &output));
        }

        info!(container_id, "Started sandbox container");

        if !wait_ready {
            return Ok(());
        }

        let deadline = tokio::time::Instant::now() + self.defaults.ready_timeout;
        while tokio::time::Instant::now() < deadline {
            if self.check_ready(container_id).await {
                debug!(container_id, "Sandbox container is ready");
                return Ok(());
            }
            tokio::time::sleep(READY_CHECK_INTERVAL).await;
        }

        warn!(
            container_id,
            timeout_secs = self.defaults.ready_timeout.as_secs(),
            "Sandbox container not ready before deadline, continuing"
        );
        Ok(())
    }

    async fn stop(&self, container_id: &str, timeout: Duration) -> Result<()> {
        let seconds = timeout.as_secs().to_string();
        let output = self
            .run(
                "docker stop",
                &["stop", "-t", &seconds, container_id],
                &[],
                CONTROL_TIMEOUT + timeout,
            )
            .await?;

        if output.status.success() {
            info!(container_id, "Stopped sandbox container");
            return Ok(());
        }

        if is_missing_container(&String::from_utf8_lossy(&output.stderr)) {
            warn!(container_id, "Container already absent, nothing to stop");
            return Ok(());
        }

        Err(Self::failure("docker stop", &output))
    }

    async fn remove(&self, container_id: &str, force: bool) -> Result<()> {
        let mut args = vec!["rm"];
        if force {
            args.push("-f");
        }
        args.push(container_id);

        let output = self
            .run("docker rm", &args, &[], CONTROL_TIMEOUT)
            .await?;

        if output.status.success() {
            info!(container_id, force, "Removed sandbox container");
            return Ok(());
        }

        if is_missing_container(&String::from_utf8_lossy(&output.stderr)) {
            warn!(container_id, "Container already absent, nothing to remove");
            return Ok(());
        }

        Err(Self::failure("docker rm", &output))
    }

    async fn inspect(&self, container_id: &str) -> Result<Option<ObservedContainer>> {
        let output = self
            .run(
                "docker inspect",
                &["inspect", "--type", "container", container_id],
                &[],
                CONTROL_TIMEOUT,
            )
            .await?;

        if !output.status.success() {
            if is_missing_container(&String::from_utf8_lossy(&output.stderr)) {
                return Ok(None);
            }
            return Err(Self::failure("docker inspect", &output));
        }

        parse_inspect_output(&String::from_utf8_lossy(&output.stdout))
    }

    async fn clone_repository(
        &self,
        container_id: &str,
        repo_url: &str,
        branch: &str,
        target_dir: &str,
        timeout: Option<Duration>,
    ) -> Result<ExecOutput> {
        let repo_url = sanitize_repo_url(repo_url)?;
        let branch = sanitize_branch(branch)?;
        let target = sanitize_path(target_dir, WORKSPACE_ROOT)?;
        if target == WORKSPACE_ROOT {
            return Err(RuntimeError::Validation(
                crate::sanitize::SanitizeError::OutsideRoot {
                    path: target,
                    root: WORKSPACE_ROOT.to_string(),
                },
            ));
        }

        let clear = self
            .run(
                "clear clone target",
                &["exec", container_id, "rm", "-rf", "--", &target],
                &[],
                CONTROL_TIMEOUT,
            )
            .await?;
        if !clear.status.success() {
            if is_missing_container(&String::from_utf8_lossy(&clear.stderr)) {
                return Err(RuntimeError::ContainerNotFound(container_id.to_string()));
            }
            return Err(Self::failure("clear clone target", &clear));
        }

        let depth = self.defaults.git_depth.to_string();
        let timeout = timeout.unwrap_or(self.defaults.clone_timeout);
        info!(container_id, repo_url = %repo_url, branch = %branch, "Cloning repository into sandbox");

        let output = self
            .run(
                "git clone",
                &[
                    "exec",
                    "-w",
                    WORKSPACE_ROOT,
                    container_id,
                    "git",
                    "clone",
                    "--branch",
                    &branch,
                    "--depth",
                    &depth,
                    "--",
                    &repo_url,
                    &target,
                ],
                &[],
                timeout,
            )
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            let combined = format!("{}\n{}", stdout, stderr);
            let errors = clone_error_lines(&combined);
            let message = if errors.is_empty() {
                combined.trim().to_string()
            } else {
                errors.join("\n")
            };
            return Err(RuntimeError::CommandFailed {
                operation: "git clone".to_string(),
                code: output.status.code(),
                message,
            });
        }

        info!(container_id, target = %target, "Repository cloned");
        Ok(ExecOutput {
            exit_code: 0,
            stdout,
            stderr,
        })
    }

    async fn seed_memory_scaffold(&self, project_id: &str, spec: &str) -> Result<()> {
        validate_identifier(project_id)?;
        let memory = self.workspace_dir(project_id).join("memory");
        tokio::fs::create_dir_all(&memory).await?;

        let readme = memory.join("README.md");
        if !tokio::fs::try_exists(&readme).await? {
            tokio::fs::write(
                &readme,
                "# Memory\n\nNotes the agent keeps between runs live in this directory.\n",
            )
            .await?;
        }

        let context = memory.join("context.md");
        if !tokio::fs::try_exists(&context).await? {
            tokio::fs::write(&context, format!("# Task\n\n{}\n", spec.trim())).await?;
        }

        info!(project_id, "Seeded sandbox memory scaffold");
        Ok(())
    }

    async fn exec(
        &self,
        container_id: &str,
        command: &str,
        workdir: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<ExecOutput> {
        let workdir = sanitize_path(
            workdir.unwrap_or(refit_core::constants::REPO_DIR),
            WORKSPACE_ROOT,
        )?;
        let timeout = timeout.unwrap_or(self.defaults.exec_timeout);

        let output = self
            .run(
                "docker exec",
                &["exec", "-w", &workdir, container_id, "sh", "-c", command],
                &[],
                timeout,
            )
            .await?;

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() && is_missing_container(&stderr) {
            return Err(RuntimeError::ContainerNotFound(container_id.to_string()));
        }

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr,
        })
    }

    async fn list_files(
        &self,
        container_id: &str,
        path: &str,
        exclude_patterns: &[String],
    ) -> Result<FileNode> {
        let root = sanitize_path(path, WORKSPACE_ROOT)?;
        for pattern in exclude_patterns {
            validate_exclude_pattern(pattern)?;
        }

        let depth = MAX_TREE_DEPTH.to_string();
        let mut args: Vec<&str> = vec!["exec", container_id, "find", &root, "-mindepth", "1"];
        args.extend(["-maxdepth", &depth]);
        if !exclude_patterns.is_empty() {
            args.push("(");
            for (i, pattern) in exclude_patterns.iter().enumerate() {
                if i > 0 {
                    args.push("-o");
                }
                args.extend(["-name", pattern.as_str()]);
            }
            args.extend([")", "-prune", "-o"]);
        }
        args.extend(["-printf", "%y %p\\n"]);

        let output = self
            .run("list files", &args, &[], CONTROL_TIMEOUT)
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if is_missing_container(&stderr) {
                return Err(RuntimeError::ContainerNotFound(container_id.to_string()));
            }
            if stderr.contains("No such file or directory") {
                return Err(RuntimeError::PathNotFound(root));
            }
            return Err(Self::failure("list files", &output));
        }

        Ok(tree_from_find_output(
            &root,
            &String::from_utf8_lossy(&output.stdout),
        ))
    }

    async fn read_file(
        &self,
        container_id: &str,
        path: &str,
        max_size: Option<u64>,
    ) -> Result<FileContent> {
        let file_path = sanitize_path(path, WORKSPACE_ROOT)?;
        let limit = max_size.unwrap_or(self.defaults.max_file_size);

        let stat = self
            .run(
                "stat file",
                &["exec", container_id, "stat", "-c", "%s|%F", "--", &file_path],
                &[],
                CONTROL_TIMEOUT,
            )
            .await?;

        if !stat.status.success() {
            let stderr = String::from_utf8_lossy(&stat.stderr);
            if is_missing_container(&stderr) {
                return Err(RuntimeError::ContainerNotFound(container_id.to_string()));
            }
            return Err(RuntimeError::PathNotFound(file_path));
        }

        let stat_line = String::from_utf8_lossy(&stat.stdout).trim().to_string();
        let (size, kind) = stat_line
            .split_once('|')
            .ok_or_else(|| RuntimeError::Parse(format!("unexpected stat output: {}", stat_line)))?;
        let size: u64 = size
            .parse()
            .map_err(|_| RuntimeError::Parse(format!("unexpected file size: {}", size)))?;

        if !kind.starts_with("regular") {
            return Err(RuntimeError::NotAFile(file_path));
        }
        if size > limit {
            return Err(RuntimeError::FileTooLarge { size, limit });
        }

        let output = self
            .run(
                "read file",
                &["exec", container_id, "cat", "--", &file_path],
                &[],
                CONTROL_TIMEOUT,
            )
            .await?;
        if !output.status.success() {
            return Err(Self::failure("read file", &output));
        }

        let (content, encoding) = match String::from_utf8(output.stdout) {
            Ok(text) => (text, "utf-8"),
            Err(err) => (general_purpose::STANDARD.encode(err.into_bytes()), "base64"),
        };

        Ok(FileContent {
            file_path,
            content,
            size,
            encoding: encoding.to_string(),
        })
    }

    async fn stream_logs(&self, container_id: &str, follow: bool, tail: usize) -> Result<LogLines> {
        crate::logs::spawn_log_stream(&self.binary, container_id, follow, tail)
    }
}
