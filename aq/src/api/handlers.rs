//! Control-plane handlers

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde_json::{json, Value};
use tracing::info;

use queuestore::{EnqueueRequest, StoreError, TaskStatus};

use crate::trace::TraceWriter;

use super::types::{
    CreateTaskRequest, CreatedTaskResponse, ErrorBody, GroupView, NamespaceQuery, ReplyRequest, TaskView,
    TraceQuery, UpdateStatusRequest, UpdateStatusResponse,
};
use super::AppState;

type ApiError = (StatusCode, Json<ErrorBody>);

fn api_error(status: StatusCode, error: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
            message: message.into(),
        }),
    )
}

fn not_found(what: &str) -> ApiError {
    api_error(StatusCode::NOT_FOUND, "NOT_FOUND", format!("{} not found", what))
}

fn store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::NotFound(what) => not_found(&what),
        StoreError::InvalidInput(message) => api_error(StatusCode::BAD_REQUEST, "INVALID_INPUT", message),
        StoreError::InvalidTransition { from, to } => api_error(
            StatusCode::BAD_REQUEST,
            "INVALID_STATUS",
            format!("transition {} -> {} is not permitted", from, to),
        ),
        other => api_error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", other.to_string()),
    }
}

/// `POST /api/tasks` and `POST /api/task-groups`
pub async fn create_task(
    State(state): State<AppState>,
    Json(body): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<CreatedTaskResponse>), ApiError> {
    let task_group_id = body
        .task_group_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "INVALID_INPUT", "task_group_id is required"))?;
    let prompt = body
        .prompt
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "INVALID_INPUT", "prompt is required"))?;

    let namespace = body.namespace.clone().unwrap_or_else(|| state.namespace.clone());
    let session_id = body.session_id.clone().unwrap_or_else(|| task_group_id.to_string());

    let record = state
        .store
        .enqueue(EnqueueRequest {
            session_id,
            task_group_id: task_group_id.to_string(),
            prompt: prompt.to_string(),
            task_type: body.task_type.unwrap_or_default(),
            namespace,
        })
        .await
        .map_err(store_error)?;

    info!(task_id = %record.id, "Task enqueued via API");
    Ok((
        StatusCode::CREATED,
        Json(CreatedTaskResponse {
            task_id: record.id,
            task_group_id: record.task_group_id,
            namespace: record.namespace,
            status: record.status,
            created_at: record.created_at,
        }),
    ))
}

/// `GET /api/tasks/:id`
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskView>, ApiError> {
    let record = state
        .store
        .get(&task_id, None)
        .map_err(store_error)?
        .ok_or_else(|| not_found("task"))?;
    Ok(Json(TaskView::from_record(&record)))
}

/// `GET /api/task-groups`
pub async fn list_groups(
    State(state): State<AppState>,
    Query(query): Query<NamespaceQuery>,
) -> Result<Json<Value>, ApiError> {
    let namespace = query.namespace.unwrap_or_else(|| state.namespace.clone());
    let groups = state.store.list_groups(&namespace).map_err(store_error)?;

    let mut views = Vec::with_capacity(groups.len());
    for group in &groups {
        let task_count = state
            .store
            .list_by_group(&group.task_group_id, &namespace)
            .map_err(store_error)?
            .len();
        views.push(GroupView::from_group(group, task_count));
    }

    Ok(Json(json!({ "namespace": namespace, "task_groups": views })))
}

/// `GET /api/task-groups/:id/tasks`
pub async fn list_group_tasks(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    Query(query): Query<NamespaceQuery>,
) -> Result<Json<Value>, ApiError> {
    let namespace = query.namespace.unwrap_or_else(|| state.namespace.clone());
    let tasks: Vec<TaskView> = state
        .store
        .list_by_group(&group_id, &namespace)
        .map_err(store_error)?
        .iter()
        .map(TaskView::from_record)
        .collect();

    Ok(Json(json!({
        "namespace": namespace,
        "task_group_id": group_id,
        "tasks": tasks,
    })))
}

/// `PATCH /api/tasks/:id/status` - only CANCELLED is accepted from users
pub async fn update_task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Json(body): Json<UpdateStatusRequest>,
) -> Result<Json<UpdateStatusResponse>, ApiError> {
    let requested = body.status.as_deref().unwrap_or_default();
    if requested != "CANCELLED" {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "INVALID_STATUS",
            format!("only CANCELLED may be requested, got {:?}", requested),
        ));
    }

    let (namespace, record) = state
        .store
        .find_task(&task_id)
        .map_err(store_error)?
        .ok_or_else(|| not_found("task"))?;

    let updated = state
        .store
        .update_status(&namespace, &task_id, queuestore::StatusPatch::Cancelled)
        .await
        .map_err(store_error)?;

    info!(%task_id, "Task cancelled via API");
    Ok(Json(UpdateStatusResponse {
        success: true,
        task_id,
        old_status: record.status,
        new_status: updated.status,
    }))
}

/// `POST /api/tasks/:id/reply`
pub async fn reply_to_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Json(body): Json<ReplyRequest>,
) -> Result<Json<UpdateStatusResponse>, ApiError> {
    let reply = body
        .reply
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "INVALID_INPUT", "reply is required"))?;

    let (namespace, record) = state
        .store
        .find_task(&task_id)
        .map_err(store_error)?
        .ok_or_else(|| not_found("task"))?;

    if record.status != TaskStatus::AwaitingResponse {
        return Err(api_error(
            StatusCode::CONFLICT,
            "INVALID_STATUS",
            format!("task is {}, reply requires AWAITING_RESPONSE", record.status),
        ));
    }

    let updated = state
        .store
        .resume_with_response(&namespace, &task_id, reply)
        .await
        .map_err(store_error)?;

    info!(%task_id, "Task resumed via API reply");
    Ok(Json(UpdateStatusResponse {
        success: true,
        task_id,
        old_status: TaskStatus::AwaitingResponse,
        new_status: updated.status,
    }))
}

/// `GET /api/tasks/:id/trace`
pub async fn get_trace(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Query(query): Query<TraceQuery>,
) -> Result<Json<Value>, ApiError> {
    if state.store.find_task(&task_id).map_err(store_error)?.is_none() {
        return Err(not_found("task"));
    }

    let runs = state
        .trace
        .read(&task_id, query.latest())
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", e.to_string()))?;
    let summary = TraceWriter::summarize(&runs);

    if query.raw() {
        Ok(Json(json!({ "task_id": task_id, "entries": runs, "summary": summary })))
    } else {
        let formatted: Vec<String> = runs
            .iter()
            .flat_map(|run| run.entries.iter().map(format_entry))
            .collect();
        Ok(Json(json!({ "task_id": task_id, "formatted": formatted, "summary": summary })))
    }
}

/// `GET /api/namespaces`
pub async fn list_namespaces(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let namespaces = state.store.list_namespaces().map_err(store_error)?;
    Ok(Json(json!({
        "namespaces": namespaces,
        "current_namespace": state.namespace,
    })))
}

/// `GET /api/runners`
pub async fn list_runners(
    State(state): State<AppState>,
    Query(query): Query<NamespaceQuery>,
) -> Json<Value> {
    let namespace = query.namespace.unwrap_or_else(|| state.namespace.clone());
    let runners = state.runners.snapshot(Some(&namespace));
    Json(json!({ "namespace": namespace, "runners": runners }))
}

/// `GET /api/health`
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let mut body = json!({
        "status": "ok",
        "timestamp": queuestore::now_ms(),
        "namespace": state.namespace,
        "web_pid": state.web_pid,
        "queue_store": {
            "type": "file",
            "endpoint": state.store.root().display().to_string(),
            "table_name": Value::Null,
        },
    });
    if let Some(sha) = &state.build_sha {
        body["build_sha"] = Value::from(sha.clone());
    }
    Json(body)
}

fn format_entry(entry: &Value) -> String {
    let timestamp = entry.get("timestamp").and_then(Value::as_i64).unwrap_or(0);
    let event = entry.get("event").and_then(Value::as_str).unwrap_or("?");
    let mut line = format!("[{}] {}", timestamp, event);
    if let Some(judgment) = entry.get("judgment").and_then(Value::as_str) {
        line.push_str(&format!(" judgment={}", judgment));
    }
    if let Some(failed) = entry.get("failed_criteria").and_then(Value::as_array) {
        if !failed.is_empty() {
            let ids: Vec<&str> = failed.iter().filter_map(Value::as_str).collect();
            line.push_str(&format!(" failed=[{}]", ids.join(",")));
        }
    }
    line
}
