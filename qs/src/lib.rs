//! QueueStore - durable, file-backed task queue
//!
//! One JSON file per task record, write-to-temp + rename for every update,
//! append-only JSONL event logs. The store exclusively owns task records
//! and validates every status transition against the task state machine.
//!
//! Layout under the state directory:
//!
//! ```text
//! queue/<namespace>/tasks/<task-id>.json
//! queue/<namespace>/groups/<group-id>.json
//! queue/<namespace>/events/<task-id>.jsonl
//! ```

pub mod error;
pub mod event;
pub mod group;
pub mod id;
pub mod store;
pub mod task;

pub use error::{StoreError, StoreResult};
pub use event::{ProgressEvent, ProgressKind};
pub use group::{ConversationEntry, GroupState, Role, TaskGroup};
pub use id::generate_id;
pub use store::{EnqueueRequest, QueueStore};
pub use task::{
    AwaitingResponsePatch, BlockedPatch, CompletePatch, ErrorPatch, StatusPatch, TaskRecord, TaskStatus, TaskType,
};

/// Current time as Unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Check a namespace identifier against the `[a-z0-9-]+` rule
pub fn is_valid_namespace(namespace: &str) -> bool {
    !namespace.is_empty()
        && namespace
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}
