/// Opaque task identity. A UUID v4 rendered as a string.
pub type TaskId = String;

/// Identifies one observer attached to a room.
pub type ObserverId = u64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Allocate a fresh, process-unique task identity.
pub fn new_task_id() -> TaskId {
    uuid::Uuid::new_v4().to_string()
}
