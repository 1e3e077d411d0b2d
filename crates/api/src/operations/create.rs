use modelhub_core::{ProgressMessage, ProgressSender, TaskBody, TaskError};
use modelhub_ollama::{render_modelfile, Fragment, OllamaClient, OllamaError};
use serde_json::json;

use super::upload::install_archive;
use crate::storage::{ModelStore, SpooledArchive};

const DOWNSTREAM_ACTION: &str = "Model server progress";

/// Everything a create needs besides the progress sender.
#[derive(Clone)]
pub struct CreateParams {
    pub ollama: OllamaClient,
    pub store: ModelStore,
    /// Store root as mounted on the model server.
    pub mount_dir: String,
    /// Model directory in the store.
    pub model: String,
    /// Name to register on the model server.
    pub target_name: String,
}

pub fn create_model(params: CreateParams, sender: ProgressSender) -> TaskBody {
    TaskBody::future(async move { run_create(&params, &sender).await })
}

/// Upload followed by create, in one task.
pub fn deploy_model(
    params: CreateParams,
    filename: String,
    spool: SpooledArchive,
    sender: ProgressSender,
) -> TaskBody {
    TaskBody::future(async move {
        let store = params.store.clone();
        let upload_sender = sender.clone();
        tokio::task::spawn_blocking(move || {
            install_archive(&store, &filename, spool, &upload_sender)
        })
        .await
        .map_err(|e| TaskError::Panicked(e.to_string()))??;

        run_create(&params, &sender).await
    })
}

async fn run_create(params: &CreateParams, sender: &ProgressSender) -> Result<(), TaskError> {
    let task_id = sender.task_id();
    let store = params.store.clone();
    let model = params.model.clone();
    let files = tokio::task::spawn_blocking(move || store.model_files(&model))
        .await
        .map_err(|e| TaskError::Panicked(e.to_string()))??;

    let server_dir = format!(
        "{}/{}",
        params.mount_dir.trim_end_matches('/'),
        params.model
    );
    let modelfile = render_modelfile(&files, &server_dir).ok_or_else(|| {
        TaskError::Internal(format!("Model '{}' has no base weights", params.model))
    })?;
    sender
        .publish(
            ProgressMessage::ok("Prepared Modelfile", 0.0)
                .with_details(json!({ "modelfile": modelfile })),
        )
        .await;

    params.ollama.ping().await?;
    tracing::info!(
        task_id,
        model = %params.model,
        target = %params.target_name,
        "Creating model on model server",
    );

    let mut stream = params
        .ollama
        .create_model(&params.target_name, &modelfile)
        .await?;

    let mut last_progress = 0.0;
    while let Some(fragment) = stream.next_fragment().await {
        match fragment? {
            Fragment::Progress(progress) => {
                if let Some(error) = progress.error() {
                    return Err(OllamaError::Reported(error.to_string()).into());
                }
                if let Some(ratio) = progress.ratio() {
                    last_progress = ratio;
                }
                let action = progress.status().unwrap_or(DOWNSTREAM_ACTION).to_string();
                sender
                    .publish(
                        ProgressMessage::ok(action, last_progress)
                            .with_details(json!({ "downstream": progress.into_value() })),
                    )
                    .await;
            }
            Fragment::Malformed { raw, error } => {
                tracing::warn!(task_id, error = %error, "Unparsable line from model server");
                sender
                    .publish(ProgressMessage::malformed(DOWNSTREAM_ACTION, &raw, &error))
                    .await;
            }
        }
    }
    Ok(())
}
