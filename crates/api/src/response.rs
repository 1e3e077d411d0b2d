//! Shared response types for API handlers.
//!
//! JSON answers use a `{ "data": ... }` envelope. Task progress is served
//! as newline-delimited JSON, one [`ProgressMessage`] per line.

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use modelhub_core::{ProgressMessage, ProgressStream};
use serde::Serialize;

/// Media type of a streamed progress body.
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Standard `{ "data": T }` response envelope.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

/// Body of a `202 Accepted` answer for a broadcast-delivered task.
#[derive(Debug, Serialize)]
pub struct TaskAccepted {
    pub task_id: String,
    /// WebSocket path observers attach to.
    pub ws_path: String,
}

/// Serve a task's progress stream as an `application/x-ndjson` body.
///
/// The body ends after the end-sentinel line.
pub fn ndjson(stream: ProgressStream) -> Response {
    let lines = stream.map(encode_line);
    (
        [(CONTENT_TYPE, NDJSON_CONTENT_TYPE)],
        Body::from_stream(lines),
    )
        .into_response()
}

fn encode_line(message: ProgressMessage) -> Result<Vec<u8>, serde_json::Error> {
    let mut line = serde_json::to_vec(&message.checked())?;
    line.push(b'\n');
    Ok(line)
}
