// ABOUTME: Caller identification for API requests
// ABOUTME: Reads the owner id from the X-User-Id header set by the fronting gateway

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};

pub const USER_ID_HEADER: &str = "x-user-id";

/// Current caller; project ownership checks compare against `id`
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
}

impl CurrentUser {
    /// Single-user deployments without a gateway
    fn default_user() -> Self {
        Self {
            id: "default-user".to_string(),
        }
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(USER_ID_HEADER) else {
            return Ok(Self::default_user());
        };

        match value.to_str().map(str::trim) {
            Ok(id) if !id.is_empty() => Ok(Self { id: id.to_string() }),
            _ => Err((StatusCode::BAD_REQUEST, "Invalid X-User-Id header")),
        }
    }
}
