//! Restart / resume detection
//!
//! Classifies stale RUNNING tasks after process start (and on every scan
//! cycle). A task with both a step log and saved output is soft-resumed:
//! left RUNNING for an external executor that may still be alive. Anything
//! else is rolled back to QUEUED and replayed, with its attempt count
//! bumped. AWAITING_RESPONSE tasks are never touched - they wait for the
//! user, however long that takes.

use tracing::{debug, info, warn};

use queuestore::{ProgressEvent, QueueStore, TaskRecord};

/// What to do with one stale RUNNING task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeDecision {
    /// Reset to QUEUED and replay; attempt_count += 1
    RollbackReplay,
    /// Leave RUNNING; reserved for long-running external executors
    SoftResume,
}

/// Classify a stale RUNNING task from its record and event log
pub fn classify(record: &TaskRecord, events: &[ProgressEvent]) -> ResumeDecision {
    let has_step_log = events.iter().any(|e| e.is_step());
    let has_output = record.output.as_deref().is_some_and(|o| !o.is_empty());

    if has_step_log && has_output {
        ResumeDecision::SoftResume
    } else {
        ResumeDecision::RollbackReplay
    }
}

/// Scan a namespace for stale RUNNING tasks and apply the decision per
/// task. Returns the number of tasks rolled back to QUEUED.
pub async fn recover_stale(store: &QueueStore, namespace: &str, max_age_ms: i64) -> eyre::Result<usize> {
    let stale = store
        .list_stale_running(namespace, max_age_ms)
        .map_err(|e| eyre::eyre!("stale scan failed: {}", e))?;

    let mut recovered = 0;
    for record in stale {
        let events = store.read_events(namespace, &record.id).unwrap_or_default();
        match classify(&record, &events) {
            ResumeDecision::RollbackReplay => {
                match store.rollback_replay(namespace, &record.id).await {
                    Ok(rolled) => {
                        info!(
                            task_id = %record.id,
                            attempt = rolled.attempt_count,
                            "Rolled back stale RUNNING task for replay"
                        );
                        recovered += 1;
                    }
                    Err(e) => warn!(task_id = %record.id, error = %e, "Failed to roll back stale task"),
                }
            }
            ResumeDecision::SoftResume => {
                debug!(task_id = %record.id, "Stale task soft-resumed (left RUNNING)");
            }
        }
    }

    Ok(recovered)
}
