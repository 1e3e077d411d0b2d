//! Model-in-use registry.
//!
//! Maps a model name to the task currently operating on it. Claiming is a
//! single atomic claim-if-absent step, and a [`ModelClaim`] releases its
//! entry exactly once when dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::CoreError;
use crate::types::TaskId;

/// Shared, cheaply cloneable registry of busy models.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    inner: Arc<Mutex<HashMap<String, TaskId>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TaskId>> {
        // The map holds plain data; a panic elsewhere cannot leave it torn.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim `model` for `task_id`, or fail with `Conflict` if another task
    /// already holds it.
    pub fn claim(&self, model: &str, task_id: &str) -> Result<ModelClaim, CoreError> {
        let mut models = self.lock();
        if let Some(holder) = models.get(model) {
            tracing::info!(model, holder = %holder, "Model busy, claim refused");
            return Err(CoreError::Conflict(format!(
                "Model '{model}' is currently in use by task {holder}"
            )));
        }
        models.insert(model.to_string(), task_id.to_string());
        tracing::debug!(model, task_id, "Model claimed");
        Ok(ModelClaim {
            registry: self.clone(),
            model: model.to_string(),
            task_id: task_id.to_string(),
        })
    }

    pub fn contains(&self, model: &str) -> bool {
        self.lock().contains_key(model)
    }

    /// Task currently holding `model`, if any.
    pub fn holder(&self, model: &str) -> Option<TaskId> {
        self.lock().get(model).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Exclusive claim on a model name; released on drop.
pub struct ModelClaim {
    registry: ModelRegistry,
    model: String,
    task_id: TaskId,
}

impl ModelClaim {
    pub fn model(&self) -> &str {
        &self.model
    }
}

impl Drop for ModelClaim {
    fn drop(&mut self) {
        let mut models = self.registry.lock();
        // Only remove the entry if it is still ours.
        if models.get(&self.model) == Some(&self.task_id) {
            models.remove(&self.model);
            tracing::debug!(model = %self.model, task_id = %self.task_id, "Model released");
        }
    }
}

impl std::fmt::Debug for ModelClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelClaim")
            .field("model", &self.model)
            .field("task_id", &self.task_id)
            .finish()
    }
}
