use modelhub_core::{ProgressMessage, ProgressSender, TaskBody};
use serde_json::json;

use crate::storage::ModelStore;

pub fn delete_model(store: ModelStore, model: String, sender: ProgressSender) -> TaskBody {
    TaskBody::blocking(move || {
        let details = json!({ "model": model });
        sender.blocking_publish(
            ProgressMessage::ok(format!("Deleting model {model}"), 0.0).with_details(details.clone()),
        );

        store.remove_model(&model)?;
        tracing::info!(task_id = %sender.task_id(), model = %model, "Model deleted");

        sender.blocking_publish(
            ProgressMessage::ok(format!("Deleted model {model}"), 1.0).with_details(details),
        );
        Ok(())
    })
}
