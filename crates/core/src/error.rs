/// Errors surfaced synchronously to the caller, before a task is submitted.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Faults raised inside a task body.
///
/// These never cross the executor boundary as errors; the executor turns
/// them into the task's terminal `server-error` progress message.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("{0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("Model server error: {0}")]
    Downstream(String),

    #[error("Task panicked: {0}")]
    Panicked(String),
}

/// Tag written to `details.error.kind` for internal faults.
pub const ERROR_KIND_INTERNAL: &str = "internal";

/// Tag written to `details.error.kind` for model-server faults.
pub const ERROR_KIND_DOWNSTREAM: &str = "downstream";

/// Tag written to `details.error.kind` for payloads that failed validation.
pub const ERROR_KIND_MALFORMED: &str = "malformed";

impl TaskError {
    /// Lets observers tell our own faults from an unavailable model server.
    pub fn kind(&self) -> &'static str {
        match self {
            TaskError::Downstream(_) => ERROR_KIND_DOWNSTREAM,
            _ => ERROR_KIND_INTERNAL,
        }
    }
}

/// A progress payload that failed to deserialize or validate.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Malformed message: {0}")]
pub struct MalformedMessage(pub String);
