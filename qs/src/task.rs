//! Task record and status state machine

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::id::generate_id;
use crate::now_ms;

/// Classification of the work a prompt asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    /// Read-only information gathering
    ReadInfo,
    /// Produce a report, no file changes expected
    Report,
    /// Small localized edit
    LightEdit,
    /// Full implementation work
    #[default]
    Implementation,
    /// Responding to review feedback
    ReviewResponse,
    /// CI or configuration changes
    ConfigCiChange,
    /// Destructive or irreversible operation; the only type allowed to block
    DangerousOp,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ReadInfo => "READ_INFO",
            Self::Report => "REPORT",
            Self::LightEdit => "LIGHT_EDIT",
            Self::Implementation => "IMPLEMENTATION",
            Self::ReviewResponse => "REVIEW_RESPONSE",
            Self::ConfigCiChange => "CONFIG_CI_CHANGE",
            Self::DangerousOp => "DANGEROUS_OP",
        };
        write!(f, "{}", s)
    }
}

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting to be claimed
    #[default]
    Queued,
    /// Claimed by a scheduler
    Running,
    /// Paused on a clarification question; resumes via user reply
    AwaitingResponse,
    /// Finished successfully
    Complete,
    /// Finished with an error
    Error,
    /// Refused pending explicit approval (DANGEROUS_OP only)
    Blocked,
    /// Cancelled by the user
    Cancelled,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::AwaitingResponse => "AWAITING_RESPONSE",
            Self::Complete => "COMPLETE",
            Self::Error => "ERROR",
            Self::Blocked => "BLOCKED",
            Self::Cancelled => "CANCELLED",
        };
        write!(f, "{}", s)
    }
}

impl TaskStatus {
    /// Terminal statuses never revert
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Blocked | Self::Cancelled)
    }

    /// The exact transition table:
    ///
    /// - QUEUED -> RUNNING | CANCELLED
    /// - RUNNING -> COMPLETE | ERROR | AWAITING_RESPONSE | BLOCKED | QUEUED (stale rollback)
    /// - AWAITING_RESPONSE -> QUEUED | CANCELLED
    pub fn can_transition_to(&self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Queued, Running)
                | (Queued, Cancelled)
                | (Running, Complete)
                | (Running, Error)
                | (Running, AwaitingResponse)
                | (Running, Blocked)
                | (Running, Queued)
                | (AwaitingResponse, Queued)
                | (AwaitingResponse, Cancelled)
        )
    }
}

/// Payload for a RUNNING -> COMPLETE transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletePatch {
    pub output: String,
}

/// Payload for a RUNNING -> ERROR transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPatch {
    pub error_message: String,
    pub output: Option<String>,
}

/// Payload for a RUNNING -> AWAITING_RESPONSE transition; the question
/// lands in `output` and must be non-empty
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwaitingResponsePatch {
    pub question: String,
}

/// Payload for a RUNNING -> BLOCKED transition (DANGEROUS_OP only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedPatch {
    pub reason: String,
}

/// One explicit payload per status transition; no untyped dictionaries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StatusPatch {
    Complete(CompletePatch),
    Error(ErrorPatch),
    AwaitingResponse(AwaitingResponsePatch),
    Blocked(BlockedPatch),
    /// Stale-recovery rollback: RUNNING -> QUEUED, attempt_count += 1
    Requeue,
    Cancelled,
}

impl StatusPatch {
    /// The status this patch transitions into
    pub fn target_status(&self) -> TaskStatus {
        match self {
            Self::Complete(_) => TaskStatus::Complete,
            Self::Error(_) => TaskStatus::Error,
            Self::AwaitingResponse(_) => TaskStatus::AwaitingResponse,
            Self::Blocked(_) => TaskStatus::Blocked,
            Self::Requeue => TaskStatus::Queued,
            Self::Cancelled => TaskStatus::Cancelled,
        }
    }
}

/// One unit of work produced by one user prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Unique identifier
    pub id: String,

    /// Conversation/thread this task belongs to
    pub task_group_id: String,

    /// Session the task arose from
    pub session_id: String,

    /// Queue partition tag
    pub namespace: String,

    /// The user prompt; immutable after create
    pub prompt: String,

    /// Work classification
    pub task_type: TaskType,

    /// Current lifecycle status
    pub status: TaskStatus,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,

    /// Last update timestamp (Unix milliseconds)
    pub updated_at: i64,

    /// Number of execution attempts; monotonically nondecreasing
    pub attempt_count: u32,

    /// Executor output, or the clarification question while AWAITING_RESPONSE
    pub output: Option<String>,

    /// Error message for ERROR status; always non-empty when set
    pub error_message: Option<String>,

    /// Set only when resuming from AWAITING_RESPONSE
    pub user_reply: Option<String>,

    /// Parent task when this record is a chunked subtask
    pub parent_task_id: Option<String>,

    /// Subtask ids produced by chunking
    pub subtask_ids: Vec<String>,
}

impl TaskRecord {
    /// Create a new QUEUED record
    pub fn new(
        session_id: impl Into<String>,
        task_group_id: impl Into<String>,
        prompt: impl Into<String>,
        task_type: TaskType,
        namespace: impl Into<String>,
    ) -> Self {
        let prompt = prompt.into();
        let now = now_ms();
        Self {
            id: generate_id("task", &prompt),
            task_group_id: task_group_id.into(),
            session_id: session_id.into(),
            namespace: namespace.into(),
            prompt,
            task_type,
            status: TaskStatus::Queued,
            created_at: now,
            updated_at: now,
            attempt_count: 0,
            output: None,
            error_message: None,
            user_reply: None,
            parent_task_id: None,
            subtask_ids: Vec::new(),
        }
    }

    /// Apply a status patch, validating the transition and the record
    /// invariants that gate BLOCKED and AWAITING_RESPONSE
    pub fn apply_patch(&mut self, patch: &StatusPatch) -> StoreResult<()> {
        let to = patch.target_status();
        if !self.status.can_transition_to(to) {
            return Err(StoreError::InvalidTransition {
                from: self.status,
                to,
            });
        }

        match patch {
            StatusPatch::Complete(p) => {
                self.output = Some(p.output.clone());
                self.error_message = None;
            }
            StatusPatch::Error(p) => {
                if p.error_message.is_empty() {
                    return Err(StoreError::InvariantViolation(
                        "ERROR requires a non-empty error message".to_string(),
                    ));
                }
                self.error_message = Some(p.error_message.clone());
                if let Some(output) = &p.output {
                    self.output = Some(output.clone());
                }
            }
            StatusPatch::AwaitingResponse(p) => {
                if p.question.is_empty() {
                    return Err(StoreError::InvariantViolation(
                        "AWAITING_RESPONSE requires a non-empty question".to_string(),
                    ));
                }
                self.output = Some(p.question.clone());
            }
            StatusPatch::Blocked(p) => {
                if self.task_type != TaskType::DangerousOp {
                    return Err(StoreError::InvariantViolation(format!(
                        "BLOCKED is not permitted for task type {}",
                        self.task_type
                    )));
                }
                if p.reason.is_empty() {
                    return Err(StoreError::InvariantViolation(
                        "BLOCKED requires a non-empty reason".to_string(),
                    ));
                }
                self.output = Some(p.reason.clone());
            }
            StatusPatch::Requeue => {
                self.attempt_count += 1;
            }
            StatusPatch::Cancelled => {}
        }

        self.status = to;
        self.updated_at = now_ms();
        Ok(())
    }
}
