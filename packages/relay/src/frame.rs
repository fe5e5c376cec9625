// ABOUTME: SSE frames produced by the relay and the classification of task log entries
// ABOUTME: Log lines shaped `[event_type] <json>` become named events, everything else a `log` event

use bytes::Bytes;
use refit_tasks::{LogEntry, Task};
use serde_json::json;

/// Event names the relay emits itself; an agent line using one is demoted to `log`
const RESERVED_EVENTS: &[&str] = &["status", "ping", "error"];

/// One unit written to an SSE response body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayFrame {
    /// `event: <event>\ndata: <data>\n\n`; `data` must be single-line JSON
    Event { event: String, data: String },
    /// A raw line from an upstream stream, forwarded without its newline
    Line(Bytes),
}

impl RelayFrame {
    pub fn event(event: impl Into<String>, data: &serde_json::Value) -> Self {
        RelayFrame::Event {
            event: event.into(),
            data: data.to_string(),
        }
    }

    pub fn ping() -> Self {
        RelayFrame::event("ping", &json!({ "timestamp": refit_core::now_rfc3339() }))
    }

    pub fn error(message: impl Into<String>) -> Self {
        RelayFrame::event("error", &json!({ "error": message.into() }))
    }

    /// The single terminal frame of a task stream
    pub fn status(task: &Task) -> Self {
        RelayFrame::event(
            "status",
            &json!({
                "status": task.status,
                "finished_at": task.finished_at,
                "error_message": task.error_message,
            }),
        )
    }

    pub fn encode(&self) -> Bytes {
        match self {
            RelayFrame::Event { event, data } => {
                Bytes::from(format!("event: {}\ndata: {}\n\n", event, data))
            }
            RelayFrame::Line(line) => {
                let mut buf = Vec::with_capacity(line.len() + 1);
                buf.extend_from_slice(line);
                buf.push(b'\n');
                Bytes::from(buf)
            }
        }
    }
}

/// Turn a task log entry into the frame a client sees
pub fn classify_entry(entry: &LogEntry) -> RelayFrame {
    if let Some((event_type, payload)) = split_structured(&entry.message) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(payload) {
            return RelayFrame::event(event_type, &value);
        }
    }

    RelayFrame::event(
        "log",
        &json!({
            "timestamp": entry.timestamp,
            "message": entry.message,
        }),
    )
}

fn split_structured(message: &str) -> Option<(&str, &str)> {
    let rest = message.strip_prefix('[')?;
    let close = rest.find(']')?;
    let event_type = &rest[..close];
    let payload = rest[close + 1..].strip_prefix(' ')?;

    let valid_name = !event_type.is_empty()
        && event_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
    if !valid_name || RESERVED_EVENTS.contains(&event_type) {
        return None;
    }
    Some((event_type, payload))
}
