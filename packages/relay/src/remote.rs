// ABOUTME: TaskService that talks to a project's agent server over HTTP
// ABOUTME: Task streams are forwarded line by line without re-parsing

use crate::frame::RelayFrame;
use crate::service::{
    FrameStream, ResumeAck, Result, ServiceError, StopAck, SubmitAck, TaskService,
};
use async_stream::stream;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use refit_core::container_name_for;
use refit_tasks::{Task, TaskKind, TaskList};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::{error, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct RemoteTaskService {
    client: Client,
    base_url: String,
}

impl RemoteTaskService {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Ok(Self::with_client(build_client()?, base_url))
    }

    /// Share one connection pool across services for different agent servers
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Agent server inside the project's sandbox, addressed by container name on the sandbox network
    pub fn for_project(project_id: &str, port: u16) -> Result<Self> {
        Self::new(project_base_url(project_id, port))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(|e| {
            warn!(base_url = %self.base_url, error = %e, "Agent server request failed");
            ServiceError::Unavailable(e.to_string())
        })?;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_from_response(response).await)
        }
    }

    async fn call<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.send(request.timeout(REQUEST_TIMEOUT)).await?;
        response.json::<T>().await.map_err(|e| ServiceError::Upstream {
            status: StatusCode::OK.as_u16(),
            message: format!("invalid response body: {}", e),
        })
    }
}

pub fn build_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| ServiceError::Unavailable(e.to_string()))
}

pub fn project_base_url(project_id: &str, port: u16) -> String {
    format!("http://{}:{}", container_name_for(project_id), port)
}

/// Map an agent server error body `{error: {code, message}}` back onto the service taxonomy
async fn error_from_response(response: Response) -> ServiceError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    let parsed: Option<serde_json::Value> = serde_json::from_str(&body).ok();
    let code = parsed
        .as_ref()
        .and_then(|v| v["error"]["code"].as_str())
        .unwrap_or_default()
        .to_string();
    let message = parsed
        .as_ref()
        .and_then(|v| v["error"]["message"].as_str())
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string());

    match (status, code.as_str()) {
        (StatusCode::NOT_FOUND, _) => ServiceError::NotFound(message),
        (StatusCode::BAD_REQUEST, "INVALID_STATE") => ServiceError::InvalidState(message),
        (StatusCode::BAD_REQUEST, _) | (StatusCode::UNPROCESSABLE_ENTITY, _) => {
            ServiceError::Validation(message)
        }
        _ => ServiceError::Upstream {
            status: status.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl TaskService for RemoteTaskService {
    async fn submit(
        &self,
        kind: TaskKind,
        input: String,
        thread_id: Option<String>,
    ) -> Result<SubmitAck> {
        let request = match kind {
            TaskKind::Run => self
                .client
                .post(self.url("/run"))
                .json(&json!({ "spec": input, "thread_id": thread_id })),
            TaskKind::Chat => self
                .client
                .post(self.url("/chat"))
                .json(&json!({ "message": input, "thread_id": thread_id })),
        };
        self.call(request).await
    }

    async fn get(&self, task_id: &str) -> Result<Task> {
        self.call(self.client.get(self.url(&format!("/tasks/{}", task_id))))
            .await
    }

    async fn list(&self) -> Result<TaskList> {
        self.call(self.client.get(self.url("/tasks"))).await
    }

    async fn stream(&self, task_id: &str) -> Result<FrameStream> {
        let url = self.url(&format!("/tasks/{}/stream", task_id));
        let response = self.send(self.client.get(&url)).await?;
        info!(url = %url, status = %response.status(), "Relaying agent task stream");

        let frames = stream! {
            let mut body = response.bytes_stream();
            let mut buffer = BytesMut::new();
            let mut forwarded = 0usize;

            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(chunk) => {
                        buffer.extend_from_slice(&chunk);
                        while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                            let line = buffer.split_to(newline + 1);
                            forwarded += 1;
                            yield RelayFrame::Line(line.freeze().slice(..newline));
                        }
                    }
                    Err(e) => {
                        error!(url = %url, error = %e, "Agent task stream broke");
                        yield RelayFrame::error(format!("Stream relay failed: {}", e));
                        return;
                    }
                }
            }

            if !buffer.is_empty() {
                forwarded += 1;
                yield RelayFrame::Line(Bytes::from(buffer.to_vec()));
            }
            info!(url = %url, lines = forwarded, "Agent task stream ended");
        };

        Ok(Box::pin(frames))
    }

    async fn stop(&self, task_id: &str) -> Result<StopAck> {
        self.call(
            self.client
                .post(self.url(&format!("/tasks/{}/stop", task_id))),
        )
        .await
    }

    async fn resume(&self, task_id: &str) -> Result<ResumeAck> {
        self.call(
            self.client
                .post(self.url(&format!("/tasks/{}/resume", task_id))),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_base_url() {
        let service = RemoteTaskService::for_project("abc123", 8000).unwrap();
        assert_eq!(service.base_url(), "http://refactor-project-abc123:8000");
    }
}
