// ABOUTME: Server-Sent Events helpers for container log streams and task relays
// ABOUTME: Typed events go through axum's Sse; relayed frames are written to the body as-is

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use futures::stream::{Stream, StreamExt};
use refit_relay::FrameStream;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;

/// Helper to create SSE response with standard keep-alive settings
pub fn create_sse_response<S>(stream: S) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

/// Helper to create an SSE event from JSON-serializable data
pub fn create_sse_event<T: serde::Serialize>(
    event_type: &str,
    data: &T,
) -> Result<Event, serde_json::Error> {
    let json_data = serde_json::to_string(data)?;

    Ok(Event::default().event(event_type).data(json_data))
}

/// Unnamed event; clients receive it as a plain `message`
pub fn create_data_event<T: serde::Serialize>(data: &T) -> Result<Event, serde_json::Error> {
    Ok(Event::default().data(serde_json::to_string(data)?))
}

/// Helper to create an error SSE event
pub fn create_error_event(error_message: &str) -> Event {
    Event::default()
        .event("error")
        .data(json!({ "error": error_message }).to_string())
}

pub fn create_ping_event() -> Event {
    Event::default()
        .event("ping")
        .data(json!({ "timestamp": refit_core::now_rfc3339() }).to_string())
}

/// Stream relay frames verbatim as an event-stream body
pub fn relay_response(frames: FrameStream) -> Response {
    let body = Body::from_stream(frames.map(|frame| Ok::<_, Infallible>(frame.encode())));

    let mut response = (StatusCode::OK, body).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}
