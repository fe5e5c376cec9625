// ABOUTME: Task service contract and Server-Sent Events relay for agent tasks
// ABOUTME: Local service polls the registry; remote service proxies a project's agent server

pub mod frame;
pub mod local;
pub mod remote;
pub mod service;

pub use frame::{classify_entry, RelayFrame};
pub use local::{LocalTaskService, PING_INTERVAL, POLL_INTERVAL};
pub use remote::RemoteTaskService;
pub use service::{
    FrameStream, ResumeAck, Result, ServiceError, StopAck, SubmitAck, TaskService,
};
