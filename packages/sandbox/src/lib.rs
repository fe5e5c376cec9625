// ABOUTME: Container runtime layer for per-project sandboxes
// ABOUTME: Input sanitization, the SandboxRuntime contract, and its Docker CLI implementation

pub mod docker_cli;
pub mod files;
pub mod logs;
pub mod runtime;
pub mod sanitize;

pub use docker_cli::DockerCli;
pub use files::{FileContent, FileNode, NodeType, DEFAULT_EXCLUDE_PATTERNS};
pub use runtime::{
    CreateRequest, ExecOutput, LogLines, ObservedContainer, Result, RuntimeError, SandboxRuntime,
};
pub use sanitize::{SanitizeError, DEFAULT_BRANCH};
