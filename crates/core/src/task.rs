//! Task identity and lifecycle.
//!
//! [`create_task`] allocates a [`TaskContext`] (owned by the task body) and
//! the matching [`ProgressStream`]. The context is the single writer of the
//! task's `alive` flag: it flips to `false` exactly once, when the executor
//! finalises the task, or when the context is dropped unfinished.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::error::TaskError;
use crate::progress::{self, ChannelConfig, ProgressMessage, ProgressSender, ProgressStream};
use crate::registry::ModelClaim;
use crate::types::{new_task_id, TaskId, Timestamp};

struct TaskState {
    alive: AtomicBool,
    finished: Notify,
}

/// Read-only view of a task: identity plus `RUNNING → FINISHED` flag.
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    operation: Arc<str>,
    created_at: Timestamp,
    state: Arc<TaskState>,
}

impl TaskHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Label of the operation this task performs, e.g. `"Delete model"`.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn is_alive(&self) -> bool {
        self.state.alive.load(Ordering::Acquire)
    }

    /// Suspend until the task has reached its terminal state.
    pub async fn wait_finished(&self) {
        loop {
            let notified = self.state.finished.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_alive() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("operation", &self.operation)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Producer-side state owned by a running task body.
///
/// Holds the progress sender and, optionally, the model claim that must be
/// released when the task ends.
pub struct TaskContext {
    handle: TaskHandle,
    sender: ProgressSender,
    claim: Option<ModelClaim>,
}

/// Allocate a new task in the `RUNNING` state.
pub fn create_task(
    operation: impl Into<String>,
    config: &ChannelConfig,
) -> (TaskContext, ProgressStream) {
    create_task_with_id(new_task_id(), operation, config)
}

/// [`create_task`] under an id allocated earlier with
/// [`new_task_id`](crate::types::new_task_id), so a model can be claimed
/// before any task exists.
pub fn create_task_with_id(
    id: TaskId,
    operation: impl Into<String>,
    config: &ChannelConfig,
) -> (TaskContext, ProgressStream) {
    let (sender, stream) = progress::channel(id.clone(), config);
    let handle = TaskHandle {
        id,
        operation: Arc::from(operation.into()),
        created_at: chrono::Utc::now(),
        state: Arc::new(TaskState {
            alive: AtomicBool::new(true),
            finished: Notify::new(),
        }),
    };
    tracing::debug!(task_id = %handle.id, operation = %handle.operation, "Task created");
    let ctx = TaskContext {
        handle,
        sender,
        claim: None,
    };
    (ctx, stream)
}

impl TaskContext {
    pub fn id(&self) -> &str {
        self.handle.id()
    }

    pub fn handle(&self) -> TaskHandle {
        self.handle.clone()
    }

    /// Keep `claim` until the task reaches its terminal state.
    pub fn hold(&mut self, claim: ModelClaim) {
        self.claim = Some(claim);
    }

    /// A producer handle for the task body.
    pub fn sender(&self) -> ProgressSender {
        self.sender.clone()
    }

    /// Release the claim, mark the task finished and publish exactly one
    /// terminal message derived from `outcome`.
    ///
    /// The terminal message is not subject to the publish timeout: it waits
    /// for a slow consumer and is only lost if the consumer is gone.
    pub(crate) async fn finish(mut self, outcome: Result<(), TaskError>) {
        self.claim.take();
        self.mark_finished();

        let operation = self.handle.operation().to_string();
        let terminal = match &outcome {
            Ok(()) => ProgressMessage::end(format!("{operation} finished")),
            Err(err) => {
                tracing::error!(
                    task_id = %self.handle.id,
                    kind = err.kind(),
                    error = %err,
                    "Task failed",
                );
                ProgressMessage::failure(format!("{operation} failed"), err)
            }
        };

        self.sender.publish_terminal(terminal).await;
        tracing::info!(
            task_id = %self.handle.id,
            success = outcome.is_ok(),
            "Task finished",
        );
    }

    fn mark_finished(&self) {
        if self.handle.state.alive.swap(false, Ordering::AcqRel) {
            self.handle.state.finished.notify_waiters();
        }
    }
}

impl Drop for TaskContext {
    fn drop(&mut self) {
        if self.handle.is_alive() {
            tracing::debug!(task_id = %self.handle.id, "Task context dropped before finishing");
            self.claim.take();
            self.mark_finished();
        }
    }
}
