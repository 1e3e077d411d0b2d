//! Binding a submitted task to a transport.
//!
//! `stream` (default) answers with the task's progress as an NDJSON body on
//! the same request. `broadcast` opens a room for the task, pumps the
//! progress stream into it and answers `202` with the WebSocket path
//! observers attach to.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use modelhub_core::{ProgressStream, TaskBody, TaskContext};
use serde::Deserialize;

use crate::error::AppResult;
use crate::response::{self, DataResponse, TaskAccepted};
use crate::state::AppState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delivery {
    #[default]
    Stream,
    Broadcast,
}

/// `?delivery=` query parameter shared by every operation route.
#[derive(Debug, Default, Deserialize)]
pub struct DeliveryParams {
    #[serde(default)]
    pub delivery: Delivery,
}

/// Submit `body` and answer according to `delivery`.
pub async fn dispatch(
    state: &AppState,
    ctx: TaskContext,
    stream: ProgressStream,
    body: TaskBody,
    delivery: Delivery,
) -> AppResult<Response> {
    let task_id = ctx.id().to_string();
    let operation = ctx.handle().operation().to_string();

    match delivery {
        Delivery::Stream => {
            state.executor.submit(ctx, body)?;
            tracing::info!(task_id = %task_id, operation = %operation, "Task started, streaming progress");
            Ok(response::ndjson(stream))
        }
        Delivery::Broadcast => {
            state.rooms.create_room(&task_id).await;
            if let Err(e) = state.executor.submit(ctx, body) {
                state.rooms.retire(&task_id).await;
                return Err(e.into());
            }

            let rooms = state.rooms.clone();
            tokio::spawn(async move { rooms.pump(stream).await });
            tracing::info!(task_id = %task_id, operation = %operation, "Task started, broadcasting progress");

            let accepted = TaskAccepted {
                ws_path: format!("/ws/{task_id}"),
                task_id,
            };
            Ok((StatusCode::ACCEPTED, Json(DataResponse { data: accepted })).into_response())
        }
    }
}
