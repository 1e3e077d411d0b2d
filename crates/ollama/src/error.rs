use std::time::Duration;

use modelhub_core::TaskError;

/// Errors talking to the model server.
#[derive(Debug, thiserror::Error)]
pub enum OllamaError {
    /// The connection check failed.
    #[error("Model server unreachable at {url}: {reason}")]
    Unreachable { url: String, reason: String },

    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The model server answered with a non-2xx status.
    #[error("Model server error ({status}): {body}")]
    Api { status: u16, body: String },

    /// No bytes arrived within the idle timeout.
    #[error("Model server sent nothing for {0:?}")]
    Timeout(Duration),

    /// The model server reported a failure inside its progress stream.
    #[error("Model server reported: {0}")]
    Reported(String),
}

impl From<OllamaError> for TaskError {
    fn from(err: OllamaError) -> Self {
        TaskError::Downstream(err.to_string())
    }
}
