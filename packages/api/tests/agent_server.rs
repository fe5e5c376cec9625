// ABOUTME: Tests for the in-sandbox agent server router and the backend's remote client against it
// ABOUTME: Covers the bare wire bodies, error codes, and SSE lines surviving the second hop unchanged

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use futures::StreamExt;
use refit_api::create_agent_router;
use refit_relay::{LocalTaskService, RelayFrame, RemoteTaskService, ServiceError, TaskService};
use refit_tasks::{
    AgentEvent, AgentEventStream, AgentRunner, AgentSession, CancellationToken, TaskKind,
    TaskRegistry,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct CountingRunner;

#[async_trait]
impl AgentRunner for CountingRunner {
    async fn open_session(
        &self,
        _kind: TaskKind,
        _thread_id: &str,
    ) -> anyhow::Result<Arc<dyn AgentSession>> {
        Ok(Arc::new(CountingSession))
    }
}

struct CountingSession;

#[async_trait]
impl AgentSession for CountingSession {
    async fn run(&self, _input: &str, _cancel: CancellationToken) -> anyhow::Result<AgentEventStream> {
        let events = (0..3).map(|step| Ok(AgentEvent::new("step", json!({ "n": step }))));
        Ok(Box::pin(futures::stream::iter(events.collect::<Vec<_>>())))
    }
}

fn service() -> Arc<LocalTaskService> {
    let registry = TaskRegistry::new(Arc::new(CountingRunner));
    Arc::new(
        LocalTaskService::new(registry)
            .with_intervals(Duration::from_millis(20), Duration::from_secs(15)),
    )
}

fn router() -> Router {
    create_agent_router(service())
}

async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_run_returns_bare_ack() {
    let router = router();
    let (status, ack) = call(&router, "POST", "/run", Some(json!({ "spec": "Split module" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["status"], "pending");
    assert_eq!(ack["message"], "Agent task started in background");
    assert!(ack["thread_id"].as_str().unwrap().starts_with("refactor-"));
    assert!(ack.get("success").is_none());

    let task_id = ack["task_id"].as_str().unwrap();
    let (status, task) = call(&router, "GET", &format!("/tasks/{}", task_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(task["task_id"], task_id);

    let (_, list) = call(&router, "GET", "/tasks", None).await;
    assert_eq!(list["total"], 1);
}

#[tokio::test]
async fn test_error_bodies_carry_codes() {
    let router = router();

    let (status, body) = call(&router, "GET", "/tasks/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, body) = call(&router, "POST", "/chat", Some(json!({ "message": "hi" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (_, ack) = call(&router, "POST", "/run", Some(json!({ "spec": "x" }))).await;
    let task_id = ack["task_id"].as_str().unwrap().to_string();
    for _ in 0..500 {
        let (_, task) = call(&router, "GET", &format!("/tasks/{}", task_id), None).await;
        if task["status"] == "success" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let (status, body) = call(&router, "POST", &format!("/tasks/{}/stop", task_id), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_STATE");
}

async fn serve_agent() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router()).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_remote_client_round_trip() {
    let base_url = serve_agent().await;
    let remote = RemoteTaskService::new(&base_url).unwrap();

    let ack = remote
        .submit(TaskKind::Run, "Split module".to_string(), Some("t-1".to_string()))
        .await
        .unwrap();
    assert_eq!(ack.thread_id, "t-1");

    let frames: Vec<RelayFrame> = tokio::time::timeout(
        Duration::from_secs(10),
        remote.stream(&ack.task_id).await.unwrap().collect(),
    )
    .await
    .unwrap();

    let text: String = frames
        .iter()
        .map(|frame| String::from_utf8(frame.encode().to_vec()).unwrap())
        .collect();
    let first = text.find("event: step\ndata: {\"n\":0}\n\n").unwrap();
    let last = text.find("event: step\ndata: {\"n\":2}\n\n").unwrap();
    assert!(first < last);
    assert!(text.trim_end().rsplit("\n\n").next().unwrap().starts_with("event: status\n"));

    let task = remote.get(&ack.task_id).await.unwrap();
    assert_eq!(task.status.to_string(), "success");

    assert!(matches!(
        remote.stop(&ack.task_id).await,
        Err(ServiceError::InvalidState(_))
    ));
    assert!(matches!(
        remote.get("missing").await,
        Err(ServiceError::NotFound(_))
    ));
}
