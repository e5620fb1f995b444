//! Progress events
//!
//! Ordered, persisted signals from an executor run. They keep timeouts
//! honest (idle time is measured against the newest event) and power the
//! trace endpoint. Every event carries the ids of the emitting run.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::now_ms;

/// Event payload variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressKind {
    /// Periodic liveness signal from the scheduler
    Heartbeat,
    /// Structured progress reported by the executor's tooling
    ToolProgress { data: Value },
    /// A chunk of the streamed transcript
    LogChunk { data: String },
}

/// One progress event from one executor run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub task_id: String,
    pub session_id: String,
    pub timestamp: i64,
    #[serde(flatten)]
    pub kind: ProgressKind,
}

impl ProgressEvent {
    pub fn heartbeat(task_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            session_id: session_id.into(),
            timestamp: now_ms(),
            kind: ProgressKind::Heartbeat,
        }
    }

    pub fn log_chunk(task_id: impl Into<String>, session_id: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            session_id: session_id.into(),
            timestamp: now_ms(),
            kind: ProgressKind::LogChunk { data: data.into() },
        }
    }

    pub fn tool_progress(task_id: impl Into<String>, session_id: impl Into<String>, data: Value) -> Self {
        Self {
            task_id: task_id.into(),
            session_id: session_id.into(),
            timestamp: now_ms(),
            kind: ProgressKind::ToolProgress { data },
        }
    }

    /// Step-log events are those carrying actual executor progress, as
    /// opposed to scheduler heartbeats
    pub fn is_step(&self) -> bool {
        matches!(self.kind, ProgressKind::ToolProgress { .. } | ProgressKind::LogChunk { .. })
    }
}
