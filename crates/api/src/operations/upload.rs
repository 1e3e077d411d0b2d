use modelhub_core::naming::archive_stem;
use modelhub_core::{ProgressMessage, ProgressSender, TaskBody, TaskError};
use serde_json::json;

use crate::storage::{ModelStore, SpooledArchive};

pub fn upload_model(
    store: ModelStore,
    filename: String,
    spool: SpooledArchive,
    sender: ProgressSender,
) -> TaskBody {
    TaskBody::blocking(move || install_archive(&store, &filename, spool, &sender))
}

/// Commit a spooled archive into the store and extract it.
pub(crate) fn install_archive(
    store: &ModelStore,
    filename: &str,
    spool: SpooledArchive,
    sender: &ProgressSender,
) -> Result<(), TaskError> {
    let bytes = spool.len();
    let path = store.commit_archive(spool, filename)?;
    tracing::info!(task_id = %sender.task_id(), path = %path.display(), bytes, "Archive saved");
    sender.blocking_publish(
        ProgressMessage::ok(format!("Saved archive {filename}"), 0.5)
            .with_details(json!({ "archive": filename, "bytes": bytes })),
    );

    let model = archive_stem(filename);
    store.extract_archive(filename)?;
    tracing::info!(task_id = %sender.task_id(), model, "Archive extracted");
    sender.blocking_publish(
        ProgressMessage::ok(format!("Extracted model {model}"), 1.0)
            .with_details(json!({ "model": model })),
    );
    Ok(())
}
