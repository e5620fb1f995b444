//! Executor stack
//!
//! A single [`Executor`] trait is the seam between the scheduler and the
//! work: the chunking engine, the review loop, and the subprocess adapter
//! are all plain values that hold the next executor and call it.

pub mod adapter;
pub mod mock;
pub mod preflight;
pub mod result;
pub mod stream;
pub mod timeout;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use queuestore::{ProgressEvent, TaskRecord, TaskType};

pub use adapter::ExecutorAdapter;
pub use mock::ScriptedExecutor;
pub use preflight::{run_preflight, PreflightError};
pub use result::{ExecStatus, ExecutorResult, FilePreview, TerminatedBy, VerifiedFile};
pub use stream::{OutputChunk, OutputRing, StdStream};
pub use timeout::{ProfileKind, TimeoutKind, TimeoutProfile, TimeoutProfiles, TimeoutWatch};

/// The unit of work an executor runs. Subtasks produced by chunking and
/// re-prompts produced by the review loop are ExecTasks too, so they flow
/// through the same stack.
#[derive(Debug, Clone)]
pub struct ExecTask {
    pub task_id: String,
    pub session_id: String,
    pub prompt: String,
    pub task_type: TaskType,
    pub created_at: i64,
    pub user_reply: Option<String>,
    /// Explicit timeout profile; the size heuristic applies when unset
    pub profile: Option<ProfileKind>,
}

impl ExecTask {
    /// Build from a claimed queue record
    pub fn from_record(record: &TaskRecord) -> Self {
        Self {
            task_id: record.id.clone(),
            session_id: record.session_id.clone(),
            prompt: record.prompt.clone(),
            task_type: record.task_type,
            created_at: record.created_at,
            user_reply: record.user_reply.clone(),
            profile: None,
        }
    }

    /// Same task with a different prompt (review re-prompts, subtasks)
    pub fn with_prompt(&self, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..self.clone()
        }
    }
}

/// Per-run plumbing handed down the executor stack
#[derive(Clone)]
pub struct ExecContext {
    /// Flips to true on user cancel; the adapter aborts the child
    pub cancel: watch::Receiver<bool>,

    /// Progress events flow up to the scheduler, which persists them
    pub events: mpsc::Sender<ProgressEvent>,
}

impl ExecContext {
    /// A context with no listeners, for tests and one-shot runs. Returns
    /// the cancel sender and event receiver so callers can drive them.
    pub fn detached() -> (Self, watch::Sender<bool>, mpsc::Receiver<ProgressEvent>) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (event_tx, event_rx) = mpsc::channel(256);
        (
            Self {
                cancel: cancel_rx,
                events: event_tx,
            },
            cancel_tx,
            event_rx,
        )
    }

    /// True once a cancel has been requested
    pub fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

/// The one-method interface every layer of the stack implements
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, task: &ExecTask, ctx: &ExecContext) -> ExecutorResult;
}
