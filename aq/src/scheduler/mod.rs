//! Scheduling
//!
//! The queue poller, the restart/resume detector it runs on every scan
//! cycle, and the runner liveness registry behind `/api/runners`.

pub mod poller;
pub mod recovery;
pub mod runners;

pub use poller::{decide_patch, PollerEvent, Scheduler, SchedulerSettings, FALLBACK_QUESTION};
pub use recovery::{classify, recover_stale, ResumeDecision};
pub use runners::{RunnerRegistry, RunnerStatus};
