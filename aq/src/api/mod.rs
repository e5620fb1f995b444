//! HTTP control plane
//!
//! Thin axum layer over the core operations: enqueue, inspect, cancel,
//! reply, trace, and the health/introspection probes. Routes, body shapes
//! and status codes are load-bearing for clients.

pub mod handlers;
pub mod types;

use std::sync::Arc;

use axum::routing::{get, patch, post};
use axum::Router;

use queuestore::QueueStore;

use crate::scheduler::RunnerRegistry;
use crate::trace::TraceWriter;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<QueueStore>,
    pub runners: Arc<RunnerRegistry>,
    pub trace: Arc<TraceWriter>,
    /// Default namespace when a request does not name one
    pub namespace: String,
    pub web_pid: u32,
    pub build_sha: Option<String>,
}

/// Build the control-plane router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/tasks", post(handlers::create_task))
        .route("/api/tasks/:id", get(handlers::get_task))
        .route("/api/tasks/:id/status", patch(handlers::update_task_status))
        .route("/api/tasks/:id/reply", post(handlers::reply_to_task))
        .route("/api/tasks/:id/trace", get(handlers::get_trace))
        .route(
            "/api/task-groups",
            get(handlers::list_groups).post(handlers::create_task),
        )
        .route("/api/task-groups/:id/tasks", get(handlers::list_group_tasks))
        .route("/api/namespaces", get(handlers::list_namespaces))
        .route("/api/runners", get(handlers::list_runners))
        .route("/api/health", get(handlers::health))
        .with_state(state)
}
