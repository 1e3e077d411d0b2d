pub mod health;

use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use tower_http::timeout::TimeoutLayer;

use crate::config::ServerConfig;
use crate::handlers::models;
use crate::state::AppState;
use crate::ws;

/// Build the model operation routes.
///
/// Route hierarchy:
///
/// ```text
/// /model/                 list (GET), delete (DELETE ?model=NAME)
/// /model/create/          create on the model server (POST, JSON)
/// /upload/                upload a .zip archive (POST, multipart)
/// /deploy/                upload then create (POST, multipart)
/// /ws/{task_id}           WebSocket progress for a broadcast task
/// ```
///
/// Operation routes take `?delivery=stream|broadcast`. Upload routes carry
/// the upload body limit and no request timeout.
pub fn api_routes(config: &ServerConfig) -> Router<AppState> {
    let timed = Router::new()
        .route("/model/", get(models::list_models).delete(models::delete_model))
        .route("/model/create/", post(models::create_model))
        .route_layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ));

    let uploads = Router::new()
        .route("/upload/", post(models::upload_model))
        .route("/deploy/", post(models::deploy_model))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes));

    Router::new()
        .merge(timed)
        .merge(uploads)
        .route("/ws/{task_id}", get(ws::ws_handler))
}
