// ABOUTME: Line stream over `docker logs` output for a sandbox container
// ABOUTME: Merges stdout and stderr, and kills the client process when the stream is dropped

use crate::runtime::{LogLines, Result, RuntimeError};
use crate::sanitize::validate_identifier;
use async_stream::stream;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogSource {
    Stdout,
    Stderr,
}

/// The docker client's own complaint, as opposed to a line the container logged
fn is_client_missing_error(line: &str) -> bool {
    line.starts_with("Error") && line.contains("No such container")
}

/// Spawn `docker logs` and expose its output as a stream of lines
///
/// The child process is owned by the stream, so dropping the stream (for example when
/// an SSE client disconnects) terminates it.
pub fn spawn_log_stream(
    binary: &Path,
    container_id: &str,
    follow: bool,
    tail: usize,
) -> Result<LogLines> {
    validate_identifier(container_id)?;

    let tail = tail.to_string();
    let mut args = vec!["logs"];
    if follow {
        args.push("-f");
    }
    args.extend(["--tail", tail.as_str(), container_id]);

    let mut child = Command::new(binary)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| RuntimeError::Parse("log stream has no stdout".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| RuntimeError::Parse("log stream has no stderr".to_string()))?;

    let container_id = container_id.to_string();
    debug!(container_id = %container_id, follow, "Streaming container logs");

    let lines = LinesStream::new(BufReader::new(stdout).lines())
        .map(|line| (LogSource::Stdout, line))
        .merge(LinesStream::new(BufReader::new(stderr).lines()).map(|line| (LogSource::Stderr, line)));

    let output = stream! {
        // Keep the child alive for as long as the stream is polled
        let mut child = child;
        let mut lines = lines;
        let mut delivered = false;

        while let Some((source, line)) = lines.next().await {
            match line {
                Ok(line) if !delivered && source == LogSource::Stderr && is_client_missing_error(&line) => {
                    yield Err(RuntimeError::ContainerNotFound(container_id.clone()));
                    break;
                }
                Ok(line) => {
                    delivered = true;
                    yield Ok(line);
                }
                Err(e) => {
                    warn!(container_id = %container_id, error = %e, "Failed reading container logs");
                    yield Err(RuntimeError::Io(e));
                    break;
                }
            }
        }

        if let Err(e) = child.wait().await {
            warn!(container_id = %container_id, error = %e, "Log client did not exit cleanly");
        }
    };

    Ok(Box::pin(output))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn fake_docker(dir: &Path, script: &str) -> std::path::PathBuf {
        let path = dir.join("docker");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_streams_lines_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let docker = fake_docker(dir.path(), "echo one\necho two\necho three");

        let lines: Vec<String> = spawn_log_stream(&docker, "abc123", false, 100)
            .unwrap()
            .map(|line| line.unwrap())
            .collect()
            .await;

        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_missing_container_reported() {
        let dir = tempfile::tempdir().unwrap();
        let docker = fake_docker(
            dir.path(),
            "echo 'Error response from daemon: No such container: gone' >&2\nexit 1",
        );

        let mut lines = spawn_log_stream(&docker, "gone", true, 10).unwrap();
        assert!(matches!(
            lines.next().await,
            Some(Err(RuntimeError::ContainerNotFound(_)))
        ));
        assert!(lines.next().await.is_none());
    }

    #[tokio::test]
    async fn test_container_output_mentioning_missing_container_is_passed_through() {
        let dir = tempfile::tempdir().unwrap();
        let docker = fake_docker(
            dir.path(),
            "echo 'cache: No such container: redis' >&2\necho 'No such container: db'\necho done",
        );

        let lines: Vec<String> = spawn_log_stream(&docker, "abc123", false, 100)
            .unwrap()
            .map(|line| line.unwrap())
            .collect()
            .await;

        assert_eq!(lines.len(), 3);
        assert!(lines.contains(&"cache: No such container: redis".to_string()));
        assert!(lines.contains(&"No such container: db".to_string()));
    }

    #[test]
    fn test_rejects_unsafe_container_id() {
        assert!(matches!(
            spawn_log_stream(Path::new("docker"), "a;rm -rf /", false, 1),
            Err(RuntimeError::Validation(_))
        ));
    }
}
