//! Bounded task executor.
//!
//! [`TaskExecutor::submit`] returns as soon as the task is admitted; the
//! body runs later on the Tokio runtime, at most `max_workers` at a time.
//! Async bodies run as their own Tokio task, blocking bodies on the blocking
//! pool. Either way the body is isolated: an error or a panic becomes the
//! task's terminal `server-error` message, never an error for the caller.
//!
//! Admission policy: up to `max_workers + queue_depth` tasks may be queued or
//! running. Beyond that `submit` fails synchronously with
//! [`CoreError::Capacity`].

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, TaskError};
use crate::task::{TaskContext, TaskHandle};

/// Sizing knobs for the worker pool.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Bodies allowed to run concurrently.
    pub max_workers: usize,
    /// Admitted tasks allowed to wait for a worker.
    pub queue_depth: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_workers: 10,
            queue_depth: 64,
        }
    }
}

type BoxedBody = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send + 'static>>;
type BlockingBody = Box<dyn FnOnce() -> Result<(), TaskError> + Send + 'static>;

/// The work a task performs.
pub enum TaskBody {
    Async(BoxedBody),
    Blocking(BlockingBody),
}

impl TaskBody {
    /// A body that suspends on I/O.
    pub fn future<F>(fut: F) -> Self
    where
        F: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        TaskBody::Async(Box::pin(fut))
    }

    /// A body that blocks its thread (filesystem work, archive extraction).
    pub fn blocking<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<(), TaskError> + Send + 'static,
    {
        TaskBody::Blocking(Box::new(f))
    }
}

/// Decrements a shared counter when dropped.
struct CounterGuard(Arc<AtomicUsize>);

impl Drop for CounterGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Runs task bodies on a bounded pool.
pub struct TaskExecutor {
    config: ExecutorConfig,
    workers: Arc<Semaphore>,
    admitted: Arc<AtomicUsize>,
    running: Arc<AtomicUsize>,
    shutdown: CancellationToken,
}

impl TaskExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        let max_workers = config.max_workers.max(1);
        tracing::info!(
            max_workers,
            queue_depth = config.queue_depth,
            "Task executor started",
        );
        Self {
            workers: Arc::new(Semaphore::new(max_workers)),
            config: ExecutorConfig {
                max_workers,
                ..config
            },
            admitted: Arc::new(AtomicUsize::new(0)),
            running: Arc::new(AtomicUsize::new(0)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Admit a task and return immediately.
    ///
    /// Must be called from within a Tokio runtime. On rejection the context
    /// is dropped, which releases any claim it holds.
    pub fn submit(&self, ctx: TaskContext, body: TaskBody) -> Result<TaskHandle, CoreError> {
        if self.shutdown.is_cancelled() {
            return Err(CoreError::Capacity(
                "Task executor is shutting down".to_string(),
            ));
        }

        let limit = self.config.max_workers + self.config.queue_depth;
        let reserved = self
            .admitted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            });
        if reserved.is_err() {
            tracing::warn!(task_id = %ctx.id(), limit, "Task rejected, executor saturated");
            return Err(CoreError::Capacity(format!(
                "{limit} tasks are already queued or running"
            )));
        }

        let handle = ctx.handle();
        let admitted = CounterGuard(Arc::clone(&self.admitted));
        let workers = Arc::clone(&self.workers);
        let running = Arc::clone(&self.running);
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                permit = workers.acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                drop(admitted);
                ctx.finish(Err(TaskError::Internal(
                    "Task executor shut down before the task started".to_string(),
                )))
                .await;
                return;
            };

            running.fetch_add(1, Ordering::AcqRel);
            let running = CounterGuard(running);
            tracing::debug!(task_id = %ctx.id(), "Task body started");

            let outcome = run_body(body).await;

            // The final status may wait on a slow consumer; it must not hold
            // a worker or an admission slot while it does.
            drop(permit);
            drop(running);
            drop(admitted);
            ctx.finish(outcome).await;
        });

        Ok(handle)
    }

    /// Tasks admitted whose body has not finished (queued + running).
    pub fn in_flight(&self) -> usize {
        self.admitted.load(Ordering::Acquire)
    }

    /// Tasks whose body is currently executing.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    /// Stop admitting work and fail every task still waiting for a worker.
    /// Bodies already running are left to complete.
    pub fn shutdown(&self) {
        tracing::info!(
            in_flight = self.in_flight(),
            running = self.running(),
            "Task executor shutting down",
        );
        self.shutdown.cancel();
    }
}

/// Run a body in its own failure domain.
async fn run_body(body: TaskBody) -> Result<(), TaskError> {
    let joined = match body {
        TaskBody::Async(fut) => tokio::spawn(fut).await,
        TaskBody::Blocking(f) => tokio::task::spawn_blocking(f).await,
    };
    joined.unwrap_or_else(|err| Err(TaskError::Panicked(describe_join_error(err))))
}

fn describe_join_error(err: JoinError) -> String {
    if !err.is_panic() {
        return "task body was cancelled".to_string();
    }
    let payload = err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "task body panicked".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
