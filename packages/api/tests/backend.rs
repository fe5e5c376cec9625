// ABOUTME: Router tests for the backend service using in-memory storage and a stub sandbox runtime
// ABOUTME: Agent tasks run in-process so the whole project-to-task flow is exercised over HTTP

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use refit_api::{create_backend_router, BackendState, InProcessAgents};
use refit_projects::{Project, ProjectOrchestrator, ProjectStorage};
use refit_sandbox::{
    CreateRequest, ExecOutput, FileContent, FileNode, LogLines, NodeType, ObservedContainer,
    SandboxRuntime,
};
use refit_tasks::{
    AgentEvent, AgentEventStream, AgentRunner, AgentSession, CancellationToken, TaskKind,
};
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

#[derive(Default)]
struct StubRuntime {
    containers: Mutex<HashMap<String, String>>,
    next_id: AtomicUsize,
}

#[async_trait]
impl SandboxRuntime for StubRuntime {
    async fn create(&self, _request: &CreateRequest) -> refit_sandbox::Result<String> {
        let id = format!("ctr-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.containers
            .lock()
            .unwrap()
            .insert(id.clone(), "created".to_string());
        Ok(id)
    }

    async fn start(&self, container_id: &str, _wait_ready: bool) -> refit_sandbox::Result<()> {
        if let Some(status) = self.containers.lock().unwrap().get_mut(container_id) {
            *status = "running".to_string();
        }
        Ok(())
    }

    async fn stop(&self, container_id: &str, _timeout: Duration) -> refit_sandbox::Result<()> {
        if let Some(status) = self.containers.lock().unwrap().get_mut(container_id) {
            *status = "exited".to_string();
        }
        Ok(())
    }

    async fn remove(&self, container_id: &str, _force: bool) -> refit_sandbox::Result<()> {
        self.containers.lock().unwrap().remove(container_id);
        Ok(())
    }

    async fn inspect(
        &self,
        container_id: &str,
    ) -> refit_sandbox::Result<Option<ObservedContainer>> {
        Ok(self
            .containers
            .lock()
            .unwrap()
            .get(container_id)
            .map(|status| ObservedContainer {
                id: container_id.to_string(),
                name: "refactor-project-x".to_string(),
                status: status.clone(),
                image: "refactor-base:latest".to_string(),
            }))
    }

    async fn clone_repository(
        &self,
        _container_id: &str,
        _repo_url: &str,
        _branch: &str,
        _target_dir: &str,
        _timeout: Option<Duration>,
    ) -> refit_sandbox::Result<ExecOutput> {
        Ok(ExecOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: "Cloning into 'repo'...".to_string(),
        })
    }

    async fn seed_memory_scaffold(&self, _project_id: &str, _spec: &str) -> refit_sandbox::Result<()> {
        Ok(())
    }

    async fn exec(
        &self,
        _container_id: &str,
        command: &str,
        _workdir: Option<&str>,
        _timeout: Option<Duration>,
    ) -> refit_sandbox::Result<ExecOutput> {
        Ok(ExecOutput {
            exit_code: 0,
            stdout: format!("ran {}\n", command),
            stderr: String::new(),
        })
    }

    async fn list_files(
        &self,
        _container_id: &str,
        path: &str,
        _exclude_patterns: &[String],
    ) -> refit_sandbox::Result<FileNode> {
        Ok(FileNode {
            node_type: NodeType::Directory,
            name: "workspace".to_string(),
            path: path.to_string(),
            children: Some(Vec::new()),
        })
    }

    async fn read_file(
        &self,
        _container_id: &str,
        path: &str,
        _max_size: Option<u64>,
    ) -> refit_sandbox::Result<FileContent> {
        Ok(FileContent {
            file_path: path.to_string(),
            content: "print('hi')\n".to_string(),
            size: 12,
            encoding: "utf-8".to_string(),
        })
    }

    async fn stream_logs(
        &self,
        _container_id: &str,
        _follow: bool,
        _tail: usize,
    ) -> refit_sandbox::Result<LogLines> {
        Ok(Box::pin(futures::stream::iter(vec![
            Ok("booting".to_string()),
            Ok("ready".to_string()),
        ])))
    }
}

struct EchoRunner;

#[async_trait]
impl AgentRunner for EchoRunner {
    async fn open_session(
        &self,
        _kind: TaskKind,
        _thread_id: &str,
    ) -> anyhow::Result<Arc<dyn AgentSession>> {
        Ok(Arc::new(EchoSession))
    }
}

struct EchoSession;

#[async_trait]
impl AgentSession for EchoSession {
    async fn run(&self, input: &str, _cancel: CancellationToken) -> anyhow::Result<AgentEventStream> {
        let event = AgentEvent::new("progress", json!({ "input": input }));
        Ok(Box::pin(futures::stream::iter(vec![Ok(event)])))
    }
}

struct TestApp {
    router: Router,
    runtime: Arc<StubRuntime>,
    /// Container each agent runner was built for, in creation order
    runner_containers: Arc<Mutex<Vec<Option<String>>>>,
}

async fn setup() -> TestApp {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let storage = Arc::new(ProjectStorage::new(pool));
    storage.migrate().await.unwrap();

    let runtime = Arc::new(StubRuntime::default());
    let orchestrator = Arc::new(ProjectOrchestrator::new(storage, runtime.clone()));
    let runner_containers = Arc::new(Mutex::new(Vec::new()));
    let seen = runner_containers.clone();
    let agents = Arc::new(InProcessAgents::new(move |project: &Project| {
        seen.lock().unwrap().push(project.container_id.clone());
        Arc::new(EchoRunner) as Arc<dyn AgentRunner>
    }));

    TestApp {
        router: create_backend_router(BackendState::new(orchestrator, agents)),
        runtime,
        runner_containers,
    }
}

async fn send(app: &TestApp, method: &str, uri: &str, user: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = send_raw(app, method, uri, user, body).await;
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn send_raw(
    app: &TestApp,
    method: &str,
    uri: &str,
    user: &str,
    body: Option<Value>,
) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-user-id", user);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

async fn ready_project(app: &TestApp, user: &str) -> String {
    let (status, created) = send(
        app,
        "POST",
        "/projects",
        user,
        Some(json!({
            "type": "REFACTOR",
            "repo_url": "https://example.com/a/b.git",
            "branch": "main",
            "spec": "Port the parser to Rust",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["data"]["status"], "CREATED");
    let id = created["data"]["id"].as_str().unwrap().to_string();

    let (status, provisioned) =
        send(app, "POST", &format!("/projects/{}/provision", id), user, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(provisioned["data"]["status"], "READY");
    id
}

async fn wait_for_task(app: &TestApp, project: &str, task: &str, status: &str) -> Value {
    for _ in 0..500 {
        let (_, body) = send(
            app,
            "GET",
            &format!("/projects/{}/tasks/{}", project, task),
            "alice",
            None,
        )
        .await;
        if body["data"]["status"] == status {
            return body["data"].clone();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {} never reached {}", task, status);
}

#[tokio::test]
async fn test_health() {
    let app = setup().await;
    let (status, body) = send(&app, "GET", "/health", "alice", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_project_to_task_scenario() {
    let app = setup().await;
    let project = ready_project(&app, "alice").await;

    let (status, run) = send(
        &app,
        "POST",
        &format!("/projects/{}/run", project),
        "alice",
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["data"]["status"], "pending");
    let task_id = run["data"]["task_id"].as_str().unwrap().to_string();
    let thread_id = run["data"]["thread_id"].as_str().unwrap().to_string();

    wait_for_task(&app, &project, &task_id, "success").await;

    let (status, stop) = send(
        &app,
        "POST",
        &format!("/projects/{}/tasks/{}/stop", project, task_id),
        "alice",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(stop["success"], false);
    assert_eq!(stop["error"]["code"], "INVALID_STATE");

    // First run binds the conversation to the project
    let (_, fetched) = send(&app, "GET", &format!("/projects/{}", project), "alice", None).await;
    assert_eq!(fetched["data"]["thread_id"], thread_id);
    assert_eq!(fetched["data"]["docker_status"]["status"], "running");

    let (_, tasks) = send(&app, "GET", &format!("/projects/{}/tasks", project), "alice", None).await;
    assert_eq!(tasks["data"]["total"], 1);
}

#[tokio::test]
async fn test_chat_without_thread_gets_its_own_conversation() {
    let app = setup().await;
    let project = ready_project(&app, "alice").await;

    let (status, chat) = send(
        &app,
        "POST",
        &format!("/projects/{}/chat", project),
        "alice",
        Some(json!({ "message": "what does the parser do?" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let thread_id = chat["data"]["thread_id"].as_str().unwrap().to_string();
    assert!(thread_id.starts_with(&format!("chat-{}-", project)));
    let task_id = chat["data"]["task_id"].as_str().unwrap().to_string();
    wait_for_task(&app, &project, &task_id, "success").await;

    // Chats never take over the project's run conversation
    let (_, fetched) = send(&app, "GET", &format!("/projects/{}", project), "alice", None).await;
    assert_eq!(fetched["data"]["thread_id"], Value::Null);

    let (_, again) = send(
        &app,
        "POST",
        &format!("/projects/{}/chat", project),
        "alice",
        Some(json!({ "message": "and the lexer?" })),
    )
    .await;
    assert_ne!(again["data"]["thread_id"], thread_id.as_str());

    let (status, followup) = send(
        &app,
        "POST",
        &format!("/projects/{}/chat", project),
        "alice",
        Some(json!({ "message": "go on", "thread_id": thread_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(followup["data"]["thread_id"], thread_id.as_str());
}

#[tokio::test]
async fn test_in_process_runner_is_bound_to_project_container() {
    let app = setup().await;
    let project = ready_project(&app, "alice").await;

    for _ in 0..2 {
        let (status, _) = send(
            &app,
            "POST",
            &format!("/projects/{}/run", project),
            "alice",
            Some(json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    assert_eq!(
        *app.runner_containers.lock().unwrap(),
        vec![Some("ctr-0".to_string())]
    );
}

#[tokio::test]
async fn test_task_stream_ends_with_status_event() {
    let app = setup().await;
    let project = ready_project(&app, "alice").await;
    let (_, run) = send(
        &app,
        "POST",
        &format!("/projects/{}/run", project),
        "alice",
        Some(json!({ "spec": "Rename module" })),
    )
    .await;
    let task_id = run["data"]["task_id"].as_str().unwrap();

    let (status, body) = tokio::time::timeout(
        Duration::from_secs(10),
        send_raw(
            &app,
            "GET",
            &format!("/projects/{}/tasks/{}/stream", project, task_id),
            "alice",
            None,
        ),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::OK);

    let body = String::from_utf8(body).unwrap();
    assert!(body.contains("event: progress\ndata: {\"input\":\"Rename module\"}\n\n"));
    assert!(body.ends_with("\n\n"));
    assert_eq!(body.matches("event: status\n").count(), 1);
    let last = body.trim_end().rsplit("\n\n").next().unwrap();
    assert!(last.starts_with("event: status\ndata: "));
    assert!(last.contains("\"status\":\"success\""));
}

#[tokio::test]
async fn test_unprovisioned_project_rejects_exec_and_files() {
    let app = setup().await;
    let (_, created) = send(
        &app,
        "POST",
        "/projects",
        "alice",
        Some(json!({ "type": "SANDBOX", "spec": "Explore" })),
    )
    .await;
    let id = created["data"]["id"].as_str().unwrap();

    let (status, body) = send(
        &app,
        "POST",
        &format!("/projects/{}/exec", id),
        "alice",
        Some(json!({ "command": "ls" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "NOT_PROVISIONED");

    let (status, _) = send(&app, "GET", &format!("/projects/{}/files", id), "alice", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Agent endpoints pretend a non-READY project does not exist
    let (status, _) = send(
        &app,
        "POST",
        &format!("/projects/{}/run", id),
        "alice",
        Some(json!({ "spec": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_exec_and_files() {
    let app = setup().await;
    let project = ready_project(&app, "alice").await;

    let (status, exec) = send(
        &app,
        "POST",
        &format!("/projects/{}/exec", project),
        "alice",
        Some(json!({ "command": "cargo test", "timeout": 60 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(exec["data"]["exit_code"], 0);
    assert_eq!(exec["data"]["stdout"], "ran cargo test\n");

    let (status, files) = send(
        &app,
        "GET",
        &format!("/projects/{}/files?path=repo", project),
        "alice",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(files["data"]["root"], "/workspace");
    assert_eq!(files["data"]["tree"]["path"], "/workspace/repo");

    let (status, file) = send(
        &app,
        "GET",
        &format!("/projects/{}/files/repo/main.py", project),
        "alice",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(file["data"]["file_path"], "/workspace/repo/main.py");
    assert_eq!(file["data"]["encoding"], "utf-8");

    let (status, denied) = send(
        &app,
        "GET",
        &format!("/projects/{}/files/agent/server.py", project),
        "alice",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(denied["error"]["code"], "AGENT_DIRECTORY_DENIED");

    let (status, traversal) = send(
        &app,
        "GET",
        &format!("/projects/{}/files?path=repo/%252e%252e/etc", project),
        "alice",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(traversal["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_container_logs_stream() {
    let app = setup().await;
    let project = ready_project(&app, "alice").await;

    let (status, body) = send_raw(
        &app,
        "GET",
        &format!("/projects/{}/logs/stream?follow=false&tail=10", project),
        "alice",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let body = String::from_utf8(body).unwrap();
    assert!(body.contains("data: {\"line\":\"booting\",\"number\":1}\n\n"));
    assert!(body.contains("data: {\"line\":\"ready\",\"number\":2}\n\n"));
    assert!(body.contains("event: end\ndata: {\"total_lines\":2}\n\n"));
}

#[tokio::test]
async fn test_ownership_and_drift() {
    let app = setup().await;
    let project = ready_project(&app, "alice").await;

    let (status, body) = send(&app, "GET", &format!("/projects/{}", project), "mallory", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "FORBIDDEN");

    let (status, _) = send(&app, "GET", &format!("/projects/{}/tasks", project), "mallory", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, listed) = send(&app, "GET", "/projects", "mallory", None).await;
    assert_eq!(listed["data"]["total"], 0);

    let (_, fetched) = send(&app, "GET", &format!("/projects/{}", project), "alice", None).await;
    let container_id = fetched["data"]["container_id"].as_str().unwrap().to_string();
    app.runtime.containers.lock().unwrap().remove(&container_id);

    let (status, drifted) = send(&app, "GET", &format!("/projects/{}", project), "alice", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(drifted["data"]["status"], "READY");
    assert_eq!(drifted["data"]["docker_status"]["status"], "not_found");
    assert_eq!(drifted["data"]["docker_status"]["inconsistent"], true);
}

#[tokio::test]
async fn test_create_rejects_injected_branch() {
    let app = setup().await;
    let (status, body) = send(
        &app,
        "POST",
        "/projects",
        "alice",
        Some(json!({
            "type": "REFACTOR",
            "repo_url": "https://example.com/a/b.git",
            "branch": "main; rm -rf /",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_repo_url_immutable_after_provision() {
    let app = setup().await;
    let project = ready_project(&app, "alice").await;

    let (status, body) = send(
        &app,
        "PUT",
        &format!("/projects/{}", project),
        "alice",
        Some(json!({ "repo_url": "https://example.com/c/d.git" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_STATE");

    let (status, body) = send(
        &app,
        "PUT",
        &format!("/projects/{}", project),
        "alice",
        Some(json!({ "title": "Parser port" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["title"], "Parser port");

    let (status, _) = send(&app, "DELETE", &format!("/projects/{}", project), "alice", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(app.runtime.containers.lock().unwrap().is_empty());
}
