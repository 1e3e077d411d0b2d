//! Task bodies for the model operations.
//!
//! Each function here builds a [`TaskBody`](modelhub_core::TaskBody) that
//! publishes intermediate progress only. The terminal message, registry
//! release and lifecycle flag are handled by the executor when the body
//! returns, so a body just returns `Err` on failure.

pub mod create;
pub mod delete;
pub mod list;
pub mod upload;

pub use create::{create_model, deploy_model, CreateParams};
pub use delete::delete_model;
pub use list::list_models;
pub use upload::upload_model;

/// Operation labels; terminal actions read "`<label>` finished/failed".
pub const OP_LIST: &str = "List models";
pub const OP_UPLOAD: &str = "Upload model";
pub const OP_DELETE: &str = "Delete model";
pub const OP_CREATE: &str = "Create model";
pub const OP_DEPLOY: &str = "Deploy model";

/// Fraction of a fixed number of steps. An empty job counts as done.
pub(crate) fn fraction(done: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        done as f64 / total as f64
    }
}
