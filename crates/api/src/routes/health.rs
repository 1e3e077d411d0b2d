use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Liveness payload served at `/`.
#[derive(Serialize)]
pub struct AliveResponse {
    pub status: &'static str,
    pub message: &'static str,
}

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Tasks queued or running on the executor.
    pub running_tasks: usize,
    /// Open subscription rooms.
    pub rooms: usize,
}

/// GET / -- the process is up.
async fn alive() -> Json<AliveResponse> {
    Json(AliveResponse {
        status: "alive",
        message: "Model handler is alive.",
    })
}

/// GET /health -- service status with task and room counts.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        running_tasks: state.executor.in_flight(),
        rooms: state.rooms.room_count().await,
    })
}

/// Mount liveness and health routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(alive))
        .route("/health", get(health_check))
}
