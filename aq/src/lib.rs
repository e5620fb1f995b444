//! AgentQueue - durable prompt-execution orchestrator
//!
//! AgentQueue accepts user prompts over HTTP, persists them in a durable
//! queue, and drives an external LLM coding agent (the "executor") through
//! a supervised lifecycle: preflight checks, progress-aware timeouts,
//! quality review of the output, and chunking of oversized prompts into
//! coordinated subtasks. Work survives process restart; stale claims are
//! rolled back and replayed without silently re-running dangerous work.
//!
//! # Modules
//!
//! - [`config`] - Configuration types and loading
//! - [`locks`] - File locks, deadlock prediction, executor semaphore
//! - [`executor`] - Child process adapter, timeouts, output streaming
//! - [`review`] - Q1-Q6 quality gates and the PASS/REJECT/RETRY loop
//! - [`chunking`] - Prompt decomposition into dependent subtasks
//! - [`scheduler`] - Queue poller and restart/resume detection
//! - [`api`] - HTTP control plane
//! - [`trace`] - Per-task review trace persistence

pub mod api;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod executor;
pub mod locks;
pub mod namespace;
pub mod review;
pub mod scheduler;
pub mod trace;

// Re-export commonly used types
pub use chunking::{analyze_prompt, ChunkAnalysis, ChunkingExecutor, ExecutionMode, SubtaskDefinition, SubtaskStatus};
pub use config::Config;
pub use executor::{
    ExecContext, ExecTask, ExecStatus, Executor, ExecutorAdapter, ExecutorResult, ProfileKind, ScriptedExecutor,
    TerminatedBy, TimeoutProfile, VerifiedFile,
};
pub use locks::{FileLock, LockError, LockManager, LockType, WaitGraph};
pub use review::{Criterion, Judgment, ReviewEvent, ReviewIteration, ReviewLoop};
pub use scheduler::{PollerEvent, ResumeDecision, RunnerRegistry, Scheduler};
pub use trace::TraceWriter;
