//! Progress messages and the bounded progress channel.
//!
//! A task body publishes [`ProgressMessage`]s through a [`ProgressSender`];
//! a single consumer drains them in FIFO order from the matching
//! [`ProgressStream`]. The stream ends right after the end-sentinel, or when
//! every sender is gone.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::Utc;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

use crate::error::{MalformedMessage, TaskError, ERROR_KIND_MALFORMED};
use crate::types::{TaskId, Timestamp};

// ---------------------------------------------------------------------------
// ProgressStatus
// ---------------------------------------------------------------------------

/// HTTP-style outcome of a progress message, serialized as a bare number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum ProgressStatus {
    /// `200`.
    Ok,
    /// `400..=499`.
    ClientError(u16),
    /// `500..=599`.
    ServerError(u16),
}

impl ProgressStatus {
    pub fn code(self) -> u16 {
        match self {
            ProgressStatus::Ok => 200,
            ProgressStatus::ClientError(code) | ProgressStatus::ServerError(code) => code,
        }
    }

    pub fn is_success(self) -> bool {
        self == ProgressStatus::Ok
    }
}

impl From<ProgressStatus> for u16 {
    fn from(status: ProgressStatus) -> u16 {
        status.code()
    }
}

impl TryFrom<u16> for ProgressStatus {
    type Error = MalformedMessage;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        match code {
            200 => Ok(ProgressStatus::Ok),
            400..=499 => Ok(ProgressStatus::ClientError(code)),
            500..=599 => Ok(ProgressStatus::ServerError(code)),
            other => Err(MalformedMessage(format!("unsupported status code {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// ProgressMessage
// ---------------------------------------------------------------------------

/// Progress value reported by failure messages.
pub const PROGRESS_FAILED: f64 = -1.0;

/// One ordered progress event. Immutable once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressMessage {
    pub status: ProgressStatus,
    /// Human-readable description of the step.
    pub action: String,
    /// Ratio in `0.0..=1.0`, or [`PROGRESS_FAILED`].
    pub progress: f64,
    /// Structured payload; `{"end": true}` marks the end-sentinel.
    #[serde(default = "empty_object")]
    pub details: Value,
    #[serde(default = "Utc::now")]
    pub timestamp: Timestamp,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl ProgressMessage {
    /// A successful step at the given progress ratio.
    pub fn ok(action: impl Into<String>, progress: f64) -> Self {
        Self {
            status: ProgressStatus::Ok,
            action: action.into(),
            progress: progress.clamp(0.0, 1.0),
            details: empty_object(),
            timestamp: Utc::now(),
        }
    }

    /// Replace the structured payload.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Successful end-sentinel.
    pub fn end(action: impl Into<String>) -> Self {
        Self::ok(action, 1.0).with_details(json!({ "end": true }))
    }

    /// Failed end-sentinel carrying the error and its kind tag.
    pub fn failure(action: impl Into<String>, err: &TaskError) -> Self {
        Self {
            status: ProgressStatus::ServerError(500),
            action: action.into(),
            progress: PROGRESS_FAILED,
            details: json!({
                "end": true,
                "error": { "kind": err.kind(), "message": err.to_string() },
            }),
            timestamp: Utc::now(),
        }
    }

    /// Non-terminal error standing in for a payload that failed validation.
    pub fn malformed(action: impl Into<String>, raw: &str, err: &MalformedMessage) -> Self {
        Self {
            status: ProgressStatus::ServerError(502),
            action: action.into(),
            progress: PROGRESS_FAILED,
            details: json!({
                "error": {
                    "kind": ERROR_KIND_MALFORMED,
                    "message": err.to_string(),
                    "raw": raw,
                },
            }),
            timestamp: Utc::now(),
        }
    }

    /// Whether this is the end-sentinel (`details.end == true`).
    pub fn is_end(&self) -> bool {
        self.details.get("end").and_then(Value::as_bool) == Some(true)
    }

    /// Check the invariants serde cannot express.
    pub fn validate(&self) -> Result<(), MalformedMessage> {
        let in_range = (0.0..=1.0).contains(&self.progress);
        if !in_range && self.progress != PROGRESS_FAILED {
            return Err(MalformedMessage(format!(
                "progress {} is outside 0..=1 and is not the failure sentinel",
                self.progress
            )));
        }
        if !self.details.is_object() {
            return Err(MalformedMessage("details must be an object".to_string()));
        }
        Ok(())
    }

    /// Pass a valid message through, or swap an invalid one for a
    /// `malformed` error message that carries it as raw text.
    pub fn checked(self) -> Self {
        match self.validate() {
            Ok(()) => self,
            Err(err) => {
                let raw = serde_json::to_string(&self).unwrap_or_default();
                tracing::warn!(action = %self.action, error = %err, "Invalid progress message");
                Self::malformed(self.action, &raw, &err)
            }
        }
    }

    /// Deserialize and validate a message received as JSON text.
    pub fn from_json(text: &str) -> Result<Self, MalformedMessage> {
        let message: ProgressMessage =
            serde_json::from_str(text).map_err(|e| MalformedMessage(e.to_string()))?;
        message.validate()?;
        Ok(message)
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Sizing for a task's progress channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Messages buffered before the producer has to wait.
    pub capacity: usize,
    /// How long a producer waits for room before the message is dropped.
    pub publish_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            publish_timeout: Duration::from_secs(5),
        }
    }
}

/// Create the producer/consumer pair for one task.
pub fn channel(task_id: TaskId, config: &ChannelConfig) -> (ProgressSender, ProgressStream) {
    let (tx, rx) = mpsc::channel(config.capacity.max(1));
    let sender = ProgressSender {
        task_id: task_id.clone(),
        tx,
        publish_timeout: config.publish_timeout,
    };
    let stream = ProgressStream {
        task_id,
        rx,
        ended: false,
    };
    (sender, stream)
}

/// Producer half. Cheap to clone; every clone feeds the same FIFO.
#[derive(Clone)]
pub struct ProgressSender {
    task_id: TaskId,
    tx: mpsc::Sender<ProgressMessage>,
    publish_timeout: Duration,
}

impl ProgressSender {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Enqueue a message, waiting at most `publish_timeout` for capacity.
    ///
    /// Returns `false` when the message was dropped, either because the
    /// consumer is gone or because the buffer stayed full.
    pub async fn publish(&self, message: ProgressMessage) -> bool {
        match self.tx.send_timeout(message, self.publish_timeout).await {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(dropped)) => {
                tracing::warn!(
                    task_id = %self.task_id,
                    action = %dropped.action,
                    timeout_ms = self.publish_timeout.as_millis() as u64,
                    "Progress channel full, message dropped",
                );
                false
            }
            Err(SendTimeoutError::Closed(_)) => {
                tracing::debug!(task_id = %self.task_id, "Progress consumer gone");
                false
            }
        }
    }

    /// Enqueue the end-sentinel, waiting for capacity as long as the
    /// consumer is alive. Returns `false` only when the consumer is gone.
    pub(crate) async fn publish_terminal(&self, message: ProgressMessage) -> bool {
        if self.tx.send(message).await.is_err() {
            tracing::debug!(task_id = %self.task_id, "Progress consumer gone before the final status");
            return false;
        }
        true
    }

    /// [`publish`](Self::publish) for task bodies running on blocking threads.
    pub fn blocking_publish(&self, message: ProgressMessage) -> bool {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle.block_on(self.publish(message)),
            Err(_) => self.tx.blocking_send(message).is_ok(),
        }
    }
}

/// Consumer half: a lazy, ordered sequence of one task's messages.
///
/// Ends after yielding the end-sentinel. If the producer side disappears
/// without sending one, a synthetic failure sentinel is yielded first so
/// consumers always observe a definite end.
pub struct ProgressStream {
    task_id: TaskId,
    rx: mpsc::Receiver<ProgressMessage>,
    ended: bool,
}

impl ProgressStream {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Suspend until the next message is available.
    pub async fn next_message(&mut self) -> Option<ProgressMessage> {
        futures::StreamExt::next(self).await
    }
}

impl Stream for ProgressStream {
    type Item = ProgressMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.ended {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(message)) => {
                if message.is_end() {
                    self.ended = true;
                    self.rx.close();
                }
                Poll::Ready(Some(message))
            }
            Poll::Ready(None) => {
                self.ended = true;
                tracing::warn!(
                    task_id = %self.task_id,
                    "Progress channel closed without an end-sentinel",
                );
                let err = TaskError::Internal("task ended without a final status".to_string());
                Poll::Ready(Some(ProgressMessage::failure("Task aborted", &err)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
