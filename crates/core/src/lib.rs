//! Task execution and progress distribution core.
//!
//! - [`task`]: task identity, lifecycle flag and the producer-side context.
//! - [`progress`]: progress messages and the bounded progress channel.
//! - [`executor`]: bounded worker pool that runs task bodies off the
//!   request path.
//! - [`room`]: subscription rooms and the per-room broadcast loop.
//! - [`registry`]: model-in-use registry (claim-if-absent).
//! - [`naming`]: model name validation shared by every entry point.
//!
//! Nothing in this crate knows about HTTP or WebSockets; transports bind to
//! it through [`progress::ProgressStream`] (pull) or [`room::RoomManager`]
//! (push).

pub mod error;
pub mod executor;
pub mod naming;
pub mod progress;
pub mod registry;
pub mod room;
pub mod task;
pub mod types;

pub use error::{CoreError, MalformedMessage, TaskError};
pub use executor::{ExecutorConfig, TaskBody, TaskExecutor};
pub use progress::{ChannelConfig, ProgressMessage, ProgressSender, ProgressStatus, ProgressStream};
pub use registry::{ModelClaim, ModelRegistry};
pub use room::{ObserverReceiver, RoomConfig, RoomManager};
pub use task::{create_task, create_task_with_id, TaskContext, TaskHandle};
pub use types::{new_task_id, ObserverId, TaskId, Timestamp};
