//! Handlers for the model operations.
//!
//! Every handler validates its input, claims the model it touches under a
//! freshly allocated task id, and only then creates the task and hands its
//! body to [`dispatch`]. Anything that fails before submission
//! is an [`AppError`]; anything after travels on the task's progress stream.

use axum::extract::{Multipart, Query, State};
use axum::response::Response;
use axum::Json;
use modelhub_core::naming::{archive_stem, validate_model_name, ARCHIVE_EXTENSION};
use modelhub_core::{create_task, create_task_with_id, new_task_id, CoreError, ModelClaim};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use validator::Validate;

use crate::delivery::{dispatch, Delivery, DeliveryParams};
use crate::error::{AppError, AppResult};
use crate::operations::{self, CreateParams, OP_CREATE, OP_DELETE, OP_DEPLOY, OP_LIST, OP_UPLOAD};
use crate::state::AppState;
use crate::storage::SpooledArchive;

/// Multipart field carrying the archive.
const FIELD_MODEL: &str = "model";
/// Multipart field carrying the model server name (deploy only).
const FIELD_TARGET_NAME: &str = "model_name_on_ollama";

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct DeleteParams {
    pub model: Option<String>,
    #[serde(default)]
    pub delivery: Delivery,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateModelRequest {
    #[validate(length(min = 1, max = 255))]
    pub model: String,
    #[validate(length(min = 1, max = 255))]
    pub model_name_on_ollama: String,
}

/// A parsed upload form whose archive is already on disk.
struct UploadForm {
    filename: String,
    spool: SpooledArchive,
    claim: ModelClaim,
    target_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Claim `model` for the task about to be created, or fail with `Conflict`.
fn claim(state: &AppState, task_id: &str, model: &str) -> AppResult<ModelClaim> {
    Ok(state.registry.claim(model, task_id)?)
}

fn ensure_exists(state: &AppState, model: &str) -> AppResult<()> {
    if state.store.contains(model) {
        Ok(())
    } else {
        Err(AppError::Core(CoreError::NotFound {
            entity: "Model",
            id: model.to_string(),
        }))
    }
}

fn create_params(state: &AppState, model: String, target_name: String) -> CreateParams {
    CreateParams {
        ollama: state.ollama.clone(),
        store: state.store.clone(),
        mount_dir: state.config.model_server_mount_dir.clone(),
        model,
        target_name,
    }
}

/// Read an upload form, claiming the archive's model as soon as its
/// filename is known and spooling the bytes straight to disk.
async fn read_upload_form(
    state: &AppState,
    task_id: &str,
    mut multipart: Multipart,
) -> AppResult<UploadForm> {
    let mut archive: Option<(String, SpooledArchive, ModelClaim)> = None;
    let mut target_name = None;

    while let Some(mut field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some(FIELD_MODEL) => {
                if archive.is_some() {
                    return Err(AppError::BadRequest(format!(
                        "Only one '{FIELD_MODEL}' file may be uploaded"
                    )));
                }
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| AppError::BadRequest("Uploaded file has no filename".to_string()))?;
                validate_model_name(&filename)?;
                if !filename.ends_with(ARCHIVE_EXTENSION) {
                    return Err(AppError::Core(CoreError::Validation(format!(
                        "'{filename}' is not a {ARCHIVE_EXTENSION} archive"
                    ))));
                }
                let model = archive_stem(&filename);
                validate_model_name(model)?;
                let model_claim = claim(state, task_id, model)?;

                let mut spool = SpooledArchive::new(state.store.spool_path(), 0);
                let mut file = tokio::fs::File::create(spool.path())
                    .await
                    .map_err(|e| AppError::InternalError(format!("Failed to create spool file: {e}")))?;
                let mut written = 0u64;
                while let Some(chunk) = field.chunk().await? {
                    file.write_all(&chunk)
                        .await
                        .map_err(|e| AppError::InternalError(format!("Failed to spool upload: {e}")))?;
                    written += chunk.len() as u64;
                }
                file.flush()
                    .await
                    .map_err(|e| AppError::InternalError(format!("Failed to spool upload: {e}")))?;
                spool.set_len(written);
                archive = Some((filename, spool, model_claim));
            }
            Some(FIELD_TARGET_NAME) => {
                target_name = Some(field.text().await?.trim().to_string());
            }
            other => {
                tracing::debug!(field = ?other, "Ignoring unknown multipart field");
            }
        }
    }

    let (filename, spool, claim) = archive.ok_or_else(|| {
        AppError::Core(CoreError::Validation(format!(
            "Multipart field '{FIELD_MODEL}' is required"
        )))
    })?;
    if spool.is_empty() {
        return Err(AppError::Core(CoreError::Validation(format!(
            "Uploaded archive '{filename}' is empty"
        ))));
    }

    Ok(UploadForm {
        filename,
        spool,
        claim,
        target_name,
    })
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// GET /model/
pub async fn list_models(
    State(state): State<AppState>,
    Query(params): Query<DeliveryParams>,
) -> AppResult<Response> {
    let (ctx, stream) = create_task(OP_LIST, &state.channel);
    let body = operations::list_models(state.store.clone(), ctx.sender());
    dispatch(&state, ctx, stream, body, params.delivery).await
}

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

/// POST /upload/
///
/// Multipart field `model` holding a `.zip` archive.
pub async fn upload_model(
    State(state): State<AppState>,
    Query(params): Query<DeliveryParams>,
    multipart: Multipart,
) -> AppResult<Response> {
    let task_id = new_task_id();
    let form = read_upload_form(&state, &task_id, multipart).await?;

    let (mut ctx, stream) = create_task_with_id(task_id, OP_UPLOAD, &state.channel);
    ctx.hold(form.claim);
    let body = operations::upload_model(state.store.clone(), form.filename, form.spool, ctx.sender());
    dispatch(&state, ctx, stream, body, params.delivery).await
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

/// DELETE /model/?model=NAME
pub async fn delete_model(
    State(state): State<AppState>,
    Query(params): Query<DeleteParams>,
) -> AppResult<Response> {
    let model = params.model.unwrap_or_default();
    validate_model_name(&model)?;

    let task_id = new_task_id();
    let model_claim = claim(&state, &task_id, &model)?;
    ensure_exists(&state, &model)?;

    let (mut ctx, stream) = create_task_with_id(task_id, OP_DELETE, &state.channel);
    ctx.hold(model_claim);
    let body = operations::delete_model(state.store.clone(), model, ctx.sender());
    dispatch(&state, ctx, stream, body, params.delivery).await
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// POST /model/create/
pub async fn create_model(
    State(state): State<AppState>,
    Query(params): Query<DeliveryParams>,
    Json(input): Json<CreateModelRequest>,
) -> AppResult<Response> {
    input.validate()?;
    validate_model_name(&input.model)?;

    let task_id = new_task_id();
    let model_claim = claim(&state, &task_id, &input.model)?;
    ensure_exists(&state, &input.model)?;

    let (mut ctx, stream) = create_task_with_id(task_id, OP_CREATE, &state.channel);
    ctx.hold(model_claim);
    let create = create_params(&state, input.model, input.model_name_on_ollama);
    let body = operations::create_model(create, ctx.sender());
    dispatch(&state, ctx, stream, body, params.delivery).await
}

// ---------------------------------------------------------------------------
// Deploy
// ---------------------------------------------------------------------------

/// POST /deploy/
///
/// Multipart fields `model` (`.zip` archive) and `model_name_on_ollama`.
pub async fn deploy_model(
    State(state): State<AppState>,
    Query(params): Query<DeliveryParams>,
    multipart: Multipart,
) -> AppResult<Response> {
    let task_id = new_task_id();
    let form = read_upload_form(&state, &task_id, multipart).await?;

    let target_name = form
        .target_name
        .filter(|name| !name.is_empty())
        .ok_or_else(|| {
            AppError::Core(CoreError::Validation(format!(
                "Multipart field '{FIELD_TARGET_NAME}' is required"
            )))
        })?;
    if target_name.len() > 255 {
        return Err(AppError::Core(CoreError::Validation(format!(
            "'{FIELD_TARGET_NAME}' must not exceed 255 bytes"
        ))));
    }

    let (mut ctx, stream) = create_task_with_id(task_id, OP_DEPLOY, &state.channel);
    ctx.hold(form.claim);
    let model = archive_stem(&form.filename).to_string();
    let create = create_params(&state, model, target_name);
    let body = operations::deploy_model(create, form.filename, form.spool, ctx.sender());
    dispatch(&state, ctx, stream, body, params.delivery).await
}
