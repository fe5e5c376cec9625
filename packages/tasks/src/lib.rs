// ABOUTME: Background agent task execution with cooperative cancellation
// ABOUTME: Registry, agent runner contract, and the subprocess-backed runner

pub mod command;
pub mod registry;
pub mod runner;
pub mod types;

pub use command::CommandAgentRunner;
pub use registry::TaskRegistry;
pub use runner::{AgentEvent, AgentEventStream, AgentRunner, AgentSession};
pub use types::{LogEntry, LogSnapshot, Result, Task, TaskError, TaskKind, TaskList, TaskStatus};

pub use tokio_util::sync::CancellationToken;
