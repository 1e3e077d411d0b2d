use modelhub_core::{ProgressMessage, ProgressSender, TaskBody};
use serde_json::json;

use super::fraction;
use crate::storage::ModelStore;

/// One message per model directory, sorted by name.
pub fn list_models(store: ModelStore, sender: ProgressSender) -> TaskBody {
    TaskBody::blocking(move || {
        let models = store.list_models()?;
        tracing::info!(task_id = %sender.task_id(), count = models.len(), "Listing models");

        let total = models.len();
        for (i, model) in models.iter().enumerate() {
            let message = ProgressMessage::ok(format!("Found model {model}"), fraction(i + 1, total))
                .with_details(json!({ "model": model }));
            sender.blocking_publish(message);
        }
        Ok(())
    })
}
