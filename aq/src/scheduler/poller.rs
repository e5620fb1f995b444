//! Queue poller
//!
//! One long-running loop per namespace. Each cycle: run the stale scan if
//! due, take an executor permit (non-blocking - back off when refused),
//! claim the oldest QUEUED task, and hand it to the executor stack in a
//! spawned run. Terminal results are rewritten per policy (BLOCKED only
//! for DANGEROUS_OP, clarification questions pause instead of completing)
//! and persisted. A stop signal finishes in-flight work but claims
//! nothing new; it never kills a running executor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use queuestore::{
    AwaitingResponsePatch, BlockedPatch, CompletePatch, ConversationEntry, ErrorPatch, ProgressEvent, QueueStore,
    Role, StatusPatch, TaskRecord, TaskStatus, TaskType,
};

use crate::config::Config;
use crate::executor::{ExecContext, ExecStatus, ExecTask, Executor, ExecutorResult, TerminatedBy};
use crate::locks::LockManager;
use crate::review::contains_clarification_question;

use super::recovery::recover_stale;
use super::runners::RunnerRegistry;

/// Question stored when an executor blocks without saying why
pub const FALLBACK_QUESTION: &str =
    "The executor blocked without an explanation. Describe how to proceed, or cancel the task.";

/// Observable poller lifecycle events
#[derive(Debug, Clone)]
pub enum PollerEvent {
    Started { scheduler_id: String, namespace: String },
    Claimed { task_id: String },
    Completed { task_id: String, status: TaskStatus },
    Error { task_id: Option<String>, message: String },
    StaleRecovered { count: usize },
}

/// Scheduler loop timing, distilled from the config
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub namespace: String,
    pub poll_interval: Duration,
    pub stale_threshold_ms: i64,
    pub stale_scan_interval: Duration,
    pub heartbeat_interval: Duration,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config, namespace: String) -> Self {
        Self {
            namespace,
            poll_interval: Duration::from_millis(config.queue.poll_interval_ms),
            stale_threshold_ms: config.queue.stale_threshold_ms,
            stale_scan_interval: Duration::from_millis(config.queue.stale_scan_interval_ms),
            heartbeat_interval: Duration::from_millis(config.queue.heartbeat_interval_ms),
        }
    }
}

/// The queue poller
pub struct Scheduler {
    scheduler_id: String,
    settings: SchedulerSettings,
    store: Arc<QueueStore>,
    locks: Arc<LockManager>,
    executor: Arc<dyn Executor>,
    runners: Arc<RunnerRegistry>,
    events_tx: broadcast::Sender<PollerEvent>,
    exec_counter: AtomicU64,
}

impl Scheduler {
    pub fn new(
        settings: SchedulerSettings,
        store: Arc<QueueStore>,
        locks: Arc<LockManager>,
        executor: Arc<dyn Executor>,
        runners: Arc<RunnerRegistry>,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            scheduler_id: queuestore::generate_id("runner", &settings.namespace),
            settings,
            store,
            locks,
            executor,
            runners,
            events_tx,
            exec_counter: AtomicU64::new(0),
        }
    }

    pub fn scheduler_id(&self) -> &str {
        &self.scheduler_id
    }

    /// Subscribe to poller lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<PollerEvent> {
        self.events_tx.subscribe()
    }

    /// Run until the stop signal flips. In-flight executions are awaited;
    /// none are aborted.
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let namespace = self.settings.namespace.clone();
        info!(scheduler_id = %self.scheduler_id, %namespace, "Scheduler started");
        let _ = self.events_tx.send(PollerEvent::Started {
            scheduler_id: self.scheduler_id.clone(),
            namespace: namespace.clone(),
        });

        let mut last_scan: Option<Instant> = None;
        let mut in_flight: Vec<JoinHandle<()>> = Vec::new();

        while !*stop.borrow() {
            self.runners.beat(&self.scheduler_id, &namespace);

            if last_scan.is_none_or(|at| at.elapsed() >= self.settings.stale_scan_interval) {
                match recover_stale(&self.store, &namespace, self.settings.stale_threshold_ms).await {
                    Ok(count) => {
                        if count > 0 {
                            let _ = self.events_tx.send(PollerEvent::StaleRecovered { count });
                        }
                    }
                    Err(e) => warn!(error = %e, "Stale recovery scan failed"),
                }
                last_scan = Some(Instant::now());
            }

            in_flight.retain(|handle| !handle.is_finished());

            let exec_id = format!(
                "{}-exec-{}",
                self.scheduler_id,
                self.exec_counter.fetch_add(1, Ordering::Relaxed)
            );
            if self.locks.acquire_semaphore(&exec_id).await.is_err() {
                self.idle_sleep(&mut stop).await;
                continue;
            }

            match self.store.claim(&namespace).await {
                Ok(Some(task)) => {
                    let _ = self.events_tx.send(PollerEvent::Claimed {
                        task_id: task.id.clone(),
                    });
                    let this = self.clone();
                    in_flight.push(tokio::spawn(async move {
                        this.run_one(task, exec_id).await;
                    }));
                }
                Ok(None) => {
                    self.locks.release_semaphore(&exec_id).await;
                    self.idle_sleep(&mut stop).await;
                }
                Err(e) => {
                    self.locks.release_semaphore(&exec_id).await;
                    // An unreadable store means no further claims until it
                    // answers again
                    error!(error = %e, "Queue store claim failed; backing off");
                    let _ = self.events_tx.send(PollerEvent::Error {
                        task_id: None,
                        message: e.to_string(),
                    });
                    self.idle_sleep(&mut stop).await;
                }
            }
        }

        info!(scheduler_id = %self.scheduler_id, "Stop requested; finishing in-flight tasks");
        for handle in in_flight {
            let _ = handle.await;
        }
        info!(scheduler_id = %self.scheduler_id, "Scheduler stopped");
    }

    async fn idle_sleep(&self, stop: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = tokio::time::sleep(self.settings.poll_interval) => {}
            _ = stop.changed() => {}
        }
    }

    /// Drive one claimed task through the executor stack and persist the
    /// terminal status.
    async fn run_one(self: Arc<Self>, task: TaskRecord, exec_id: String) {
        let namespace = self.settings.namespace.clone();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (event_tx, mut event_rx) = mpsc::channel::<ProgressEvent>(256);
        let ctx = ExecContext {
            cancel: cancel_rx,
            events: event_tx,
        };

        // Progress flusher: events from subtasks fold into the claimed
        // task's log so staleness tracking sees one run
        let flusher = tokio::spawn({
            let store = self.store.clone();
            let namespace = namespace.clone();
            let task_id = task.id.clone();
            async move {
                while let Some(mut event) = event_rx.recv().await {
                    event.task_id = task_id.clone();
                    if let Err(e) = store.append_event(&namespace, &event).await {
                        warn!(error = %e, "Failed to persist progress event");
                    }
                }
            }
        });

        // Heartbeat writer doubling as the cancel watcher: after each beat
        // it re-reads the record and aborts the subprocess on user cancel
        let heartbeat = tokio::spawn({
            let store = self.store.clone();
            let namespace = namespace.clone();
            let task_id = task.id.clone();
            let session_id = task.session_id.clone();
            let interval = self.settings.heartbeat_interval;
            async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    let beat = ProgressEvent::heartbeat(&task_id, &session_id);
                    if let Err(e) = store.append_event(&namespace, &beat).await {
                        warn!(error = %e, "Failed to persist heartbeat");
                    }
                    match store.get(&task_id, Some(namespace.as_str())) {
                        Ok(Some(record)) if record.status == TaskStatus::Cancelled => {
                            info!(%task_id, "User cancel observed; aborting executor");
                            let _ = cancel_tx.send(true);
                            break;
                        }
                        _ => {}
                    }
                }
            }
        });

        let exec_task = ExecTask::from_record(&task);
        let result = self.executor.execute(&exec_task, &ctx).await;

        heartbeat.abort();
        drop(ctx);
        let _ = flusher.await;

        self.persist_result(&task, result).await;
        self.locks.release_semaphore(&exec_id).await;
    }

    async fn persist_result(&self, task: &TaskRecord, result: ExecutorResult) {
        let namespace = &self.settings.namespace;

        // A cancelled run is already terminal in the store; nothing to write
        let externally_cancelled = result.terminated_by == Some(TerminatedBy::Cancelled)
            || matches!(
                self.store.get(&task.id, Some(namespace.as_str())),
                Ok(Some(ref current)) if current.status == TaskStatus::Cancelled
            );
        if externally_cancelled {
            debug!(task_id = %task.id, "Skipping result for cancelled task");
            let _ = self.events_tx.send(PollerEvent::Completed {
                task_id: task.id.clone(),
                status: TaskStatus::Cancelled,
            });
            return;
        }

        let patch = decide_patch(task, &result);
        match self.store.update_status(namespace, &task.id, patch).await {
            Ok(updated) => {
                let history_entry = updated
                    .output
                    .clone()
                    .or_else(|| updated.error_message.clone())
                    .unwrap_or_default();
                if !history_entry.is_empty() {
                    let entry = ConversationEntry::new(Role::Assistant, history_entry, Some(task.id.clone()));
                    if let Err(e) = self
                        .store
                        .append_group_entry(namespace, &task.task_group_id, entry)
                        .await
                    {
                        warn!(error = %e, "Failed to append assistant history entry");
                    }
                }
                info!(task_id = %task.id, status = %updated.status, "Task finished");
                let _ = self.events_tx.send(PollerEvent::Completed {
                    task_id: task.id.clone(),
                    status: updated.status,
                });
            }
            Err(e) => {
                error!(task_id = %task.id, error = %e, "Failed to persist terminal status");
                let _ = self.events_tx.send(PollerEvent::Error {
                    task_id: Some(task.id.clone()),
                    message: e.to_string(),
                });
            }
        }
    }
}

/// Map an executor result onto a status patch, applying the write-time
/// rewrites: BLOCKED is reserved for DANGEROUS_OP, and a READ_INFO/REPORT
/// completion that reads as a clarification question pauses the task
/// instead of closing it.
pub fn decide_patch(task: &TaskRecord, result: &ExecutorResult) -> StatusPatch {
    let non_empty = |s: &str| {
        let trimmed = s.trim();
        (!trimmed.is_empty()).then(|| s.to_string())
    };

    match result.status {
        ExecStatus::Complete => {
            if matches!(task.task_type, TaskType::ReadInfo | TaskType::Report)
                && contains_clarification_question(&result.output)
            {
                StatusPatch::AwaitingResponse(AwaitingResponsePatch {
                    question: result.output.clone(),
                })
            } else {
                StatusPatch::Complete(CompletePatch {
                    output: result.output.clone(),
                })
            }
        }
        ExecStatus::AwaitingResponse => {
            let question = non_empty(&result.output)
                .or_else(|| result.blocked_reason.clone())
                .unwrap_or_else(|| FALLBACK_QUESTION.to_string());
            StatusPatch::AwaitingResponse(AwaitingResponsePatch { question })
        }
        ExecStatus::Blocked => {
            let reason = result
                .blocked_reason
                .clone()
                .and_then(|r| non_empty(&r))
                .or_else(|| non_empty(&result.output));
            match reason {
                Some(reason) if task.task_type == TaskType::DangerousOp => {
                    StatusPatch::Blocked(BlockedPatch { reason })
                }
                reason => StatusPatch::Error(ErrorPatch {
                    error_message: reason.unwrap_or_else(|| FALLBACK_QUESTION.to_string()),
                    output: non_empty(&result.output),
                }),
            }
        }
        ExecStatus::Error | ExecStatus::Incomplete | ExecStatus::NoEvidence => StatusPatch::Error(ErrorPatch {
            error_message: result
                .error
                .clone()
                .and_then(|e| non_empty(&e))
                .unwrap_or_else(|| format!("executor finished with status {:?}", result.status)),
            output: non_empty(&result.output),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ScriptedExecutor;
    use queuestore::EnqueueRequest;
    use tempfile::tempdir;

    const NS: &str = "test-ns";

    fn settings() -> SchedulerSettings {
        SchedulerSettings {
            namespace: NS.to_string(),
            poll_interval: Duration::from_millis(10),
            stale_threshold_ms: 30_000,
            stale_scan_interval: Duration::from_secs(60),
            heartbeat_interval: Duration::from_millis(20),
        }
    }

    fn request(prompt: &str, task_type: TaskType) -> EnqueueRequest {
        EnqueueRequest {
            session_id: "s1".to_string(),
            task_group_id: "g1".to_string(),
            prompt: prompt.to_string(),
            task_type,
            namespace: NS.to_string(),
        }
    }

    async fn wait_for_status(store: &QueueStore, task_id: &str, status: TaskStatus) -> TaskRecord {
        for _ in 0..300 {
            if let Some(record) = store.get(task_id, Some(NS)).unwrap() {
                if record.status == status {
                    return record;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} never reached {:?}", task_id, status);
    }

    fn scheduler_with(executor: Arc<dyn Executor>, store: Arc<QueueStore>) -> Arc<Scheduler> {
        Arc::new(Scheduler::new(
            settings(),
            store,
            Arc::new(LockManager::new(4)),
            executor,
            Arc::new(RunnerRegistry::new(120_000)),
        ))
    }

    #[tokio::test]
    async fn test_happy_path_completes_task() {
        let temp = tempdir().unwrap();
        let store = Arc::new(QueueStore::open(temp.path()).unwrap());
        let executor = Arc::new(ScriptedExecutor::new(vec![ExecutorResult::complete("wrote hello")
            .with_verified_file("hello.txt", 6)]));
        let scheduler = scheduler_with(executor, store.clone());

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.clone().run(stop_rx));

        let task = store.enqueue(request("write hello.txt", TaskType::Implementation)).await.unwrap();
        let finished = wait_for_status(&store, &task.id, TaskStatus::Complete).await;
        assert_eq!(finished.output.as_deref(), Some("wrote hello"));

        // The assistant's answer landed in the conversation history
        let group = store.get_group(NS, "g1").unwrap().unwrap();
        assert!(group
            .conversation_history
            .iter()
            .any(|e| e.role == Role::Assistant && e.content == "wrote hello"));

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_non_dangerous_blocked_is_rewritten_to_error() {
        let temp = tempdir().unwrap();
        let store = Arc::new(QueueStore::open(temp.path()).unwrap());
        let mut blocked = ExecutorResult::empty(ExecStatus::Blocked);
        blocked.executed = true;
        let executor = Arc::new(ScriptedExecutor::new(vec![blocked]));
        let scheduler = scheduler_with(executor, store.clone());

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.clone().run(stop_rx));

        let task = store.enqueue(request("read the config", TaskType::ReadInfo)).await.unwrap();
        let finished = wait_for_status(&store, &task.id, TaskStatus::Error).await;
        assert_eq!(finished.error_message.as_deref(), Some(FALLBACK_QUESTION));

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_dangerous_op_blocked_persists() {
        let temp = tempdir().unwrap();
        let store = Arc::new(QueueStore::open(temp.path()).unwrap());
        let mut blocked = ExecutorResult::empty(ExecStatus::Blocked);
        blocked.executed = true;
        blocked.blocked_reason = Some("this would drop the database".to_string());
        let executor = Arc::new(ScriptedExecutor::new(vec![blocked]));
        let scheduler = scheduler_with(executor, store.clone());

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.clone().run(stop_rx));

        let task = store.enqueue(request("drop the database", TaskType::DangerousOp)).await.unwrap();
        let finished = wait_for_status(&store, &task.id, TaskStatus::Blocked).await;
        assert_eq!(finished.output.as_deref(), Some("this would drop the database"));

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_read_info_question_pauses_task() {
        let temp = tempdir().unwrap();
        let store = Arc::new(QueueStore::open(temp.path()).unwrap());
        let executor = Arc::new(ScriptedExecutor::new(vec![ExecutorResult::complete(
            "Should I include the archived entries too?",
        )]));
        let scheduler = scheduler_with(executor, store.clone());

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.clone().run(stop_rx));

        let task = store.enqueue(request("list the entries", TaskType::ReadInfo)).await.unwrap();
        let paused = wait_for_status(&store, &task.id, TaskStatus::AwaitingResponse).await;
        assert!(paused.output.as_deref().unwrap().contains("archived"));

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_heartbeats_are_recorded() {
        let temp = tempdir().unwrap();
        let store = Arc::new(QueueStore::open(temp.path()).unwrap());

        // An executor slow enough for at least one heartbeat tick
        struct SlowExecutor;
        #[async_trait::async_trait]
        impl Executor for SlowExecutor {
            async fn execute(&self, _task: &ExecTask, _ctx: &ExecContext) -> ExecutorResult {
                tokio::time::sleep(Duration::from_millis(100)).await;
                ExecutorResult::complete("slow done")
            }
        }

        let scheduler = scheduler_with(Arc::new(SlowExecutor), store.clone());
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.clone().run(stop_rx));

        let task = store.enqueue(request("slow work", TaskType::Implementation)).await.unwrap();
        wait_for_status(&store, &task.id, TaskStatus::Complete).await;

        let events = store.read_events(NS, &task.id).unwrap();
        assert!(events.iter().any(|e| !e.is_step()), "expected heartbeat events");

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_prevents_new_claims() {
        let temp = tempdir().unwrap();
        let store = Arc::new(QueueStore::open(temp.path()).unwrap());
        let executor = Arc::new(ScriptedExecutor::new(vec![]));
        let scheduler = scheduler_with(executor.clone(), store.clone());

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(scheduler.clone().run(stop_rx));
        tokio::time::sleep(Duration::from_millis(30)).await;
        stop_tx.send(true).unwrap();
        handle.await.unwrap();

        // Enqueued after stop: never claimed
        let task = store.enqueue(request("late work", TaskType::Implementation)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let record = store.get(&task.id, Some(NS)).unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Queued);
        assert_eq!(executor.call_count(), 0);
    }

    #[test]
    fn test_decide_patch_error_keeps_message() {
        let task = TaskRecord::new("s1", "g1", "p", TaskType::Implementation, NS);
        let result = ExecutorResult::error("AUTH_ERROR: no credential");
        match decide_patch(&task, &result) {
            StatusPatch::Error(patch) => {
                assert_eq!(patch.error_message, "AUTH_ERROR: no credential");
            }
            other => panic!("unexpected patch: {:?}", other),
        }
    }

    #[test]
    fn test_decide_patch_incomplete_maps_to_error() {
        let task = TaskRecord::new("s1", "g1", "p", TaskType::Implementation, NS);
        let mut result = ExecutorResult::empty(ExecStatus::Incomplete);
        result.executed = true;
        match decide_patch(&task, &result) {
            StatusPatch::Error(patch) => assert!(!patch.error_message.is_empty()),
            other => panic!("unexpected patch: {:?}", other),
        }
    }

    #[test]
    fn test_decide_patch_awaiting_never_empty() {
        let task = TaskRecord::new("s1", "g1", "p", TaskType::Implementation, NS);
        let mut result = ExecutorResult::empty(ExecStatus::AwaitingResponse);
        result.executed = true;
        match decide_patch(&task, &result) {
            StatusPatch::AwaitingResponse(patch) => assert_eq!(patch.question, FALLBACK_QUESTION),
            other => panic!("unexpected patch: {:?}", other),
        }
    }
}
