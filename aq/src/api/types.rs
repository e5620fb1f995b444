//! Control-plane request and response bodies

use serde::{Deserialize, Serialize};

use queuestore::{TaskGroup, TaskRecord, TaskStatus, TaskType};

/// Body of `POST /api/tasks` and `POST /api/task-groups`
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub task_group_id: Option<String>,
    pub prompt: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub task_type: Option<TaskType>,
    #[serde(default)]
    pub namespace: Option<String>,
}

/// 201 body for task creation
#[derive(Debug, Serialize)]
pub struct CreatedTaskResponse {
    pub task_id: String,
    pub task_group_id: String,
    pub namespace: String,
    pub status: TaskStatus,
    pub created_at: i64,
}

/// Body of `PATCH /api/tasks/:id/status`
#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: Option<String>,
}

/// 200 body for a status update
#[derive(Debug, Serialize)]
pub struct UpdateStatusResponse {
    pub success: bool,
    pub task_id: String,
    pub old_status: TaskStatus,
    pub new_status: TaskStatus,
}

/// Body of `POST /api/tasks/:id/reply`
#[derive(Debug, Deserialize)]
pub struct ReplyRequest {
    pub reply: Option<String>,
}

/// Error envelope for every 4xx
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

/// Full task projection
#[derive(Debug, Serialize)]
pub struct TaskView {
    pub task_id: String,
    pub task_group_id: String,
    pub session_id: String,
    pub namespace: String,
    pub prompt: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub created_at: i64,
    pub updated_at: i64,
    pub attempt_count: u32,
    pub output: Option<String>,
    pub error_message: Option<String>,
    pub user_reply: Option<String>,
    pub parent_task_id: Option<String>,
    pub subtask_ids: Vec<String>,
    /// True exactly while the task waits for a user reply
    pub show_reply_ui: bool,
}

impl TaskView {
    pub fn from_record(record: &TaskRecord) -> Self {
        Self {
            task_id: record.id.clone(),
            task_group_id: record.task_group_id.clone(),
            session_id: record.session_id.clone(),
            namespace: record.namespace.clone(),
            prompt: record.prompt.clone(),
            task_type: record.task_type,
            status: record.status,
            created_at: record.created_at,
            updated_at: record.updated_at,
            attempt_count: record.attempt_count,
            output: record.output.clone(),
            error_message: record.error_message.clone(),
            user_reply: record.user_reply.clone(),
            parent_task_id: record.parent_task_id.clone(),
            subtask_ids: record.subtask_ids.clone(),
            show_reply_ui: record.status == TaskStatus::AwaitingResponse,
        }
    }
}

/// Group summary for listings
#[derive(Debug, Serialize)]
pub struct GroupView {
    pub task_group_id: String,
    pub session_id: String,
    pub state: queuestore::GroupState,
    pub task_count: usize,
    pub created_at: i64,
    pub updated_at: i64,
}

impl GroupView {
    pub fn from_group(group: &TaskGroup, task_count: usize) -> Self {
        Self {
            task_group_id: group.task_group_id.clone(),
            session_id: group.session_id.clone(),
            state: group.state,
            task_count,
            created_at: group.created_at,
            updated_at: group.updated_at,
        }
    }
}

/// Common `?namespace=` query
#[derive(Debug, Deserialize)]
pub struct NamespaceQuery {
    #[serde(default)]
    pub namespace: Option<String>,
}

/// Query of `GET /api/tasks/:id/trace`
#[derive(Debug, Deserialize)]
pub struct TraceQuery {
    #[serde(default)]
    pub latest: Option<String>,
    #[serde(default)]
    pub raw: Option<String>,
}

impl TraceQuery {
    pub fn latest(&self) -> bool {
        flag(&self.latest)
    }

    pub fn raw(&self) -> bool {
        flag(&self.raw)
    }
}

fn flag(value: &Option<String>) -> bool {
    matches!(value.as_deref(), Some("true") | Some("1") | Some("yes"))
}
