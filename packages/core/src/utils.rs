// ABOUTME: Shared utility functions for Refit
// ABOUTME: ID generation, container naming, and timestamp helpers

use crate::constants::CONTAINER_NAME_PREFIX;
use chrono::{SecondsFormat, Utc};

/// Generate a unique project ID (8 alphanumeric characters, safe for container names)
pub fn generate_project_id() -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| {
            let idx = rng.gen_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// Deterministic sandbox container name for a project
pub fn container_name_for(project_id: &str) -> String {
    format!("{}{}", CONTAINER_NAME_PREFIX, project_id)
}

/// Current UTC time as an RFC3339 string with millisecond precision
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
