use axum::Json;
use serde_json::{json, Value};

pub async fn backend_health() -> Json<Value> {
    health("refit-backend")
}

pub async fn agent_health() -> Json<Value> {
    health("refit-agent")
}

fn health(service: &str) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": refit_core::now_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "service": service
    }))
}
