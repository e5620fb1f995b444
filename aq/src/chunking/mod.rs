//! Task chunking
//!
//! Decomposes a large prompt into coordinated subtasks, executes them
//! sequentially or in parallel under the global executor semaphore, retries
//! transient failures with exponential backoff, and aggregates the subtask
//! results into one parent result.

pub mod analyzer;

pub use analyzer::{analyze_prompt, ChunkAnalysis, ExecutionMode};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use queuestore::now_ms;

use crate::config::ChunkingConfig;
use crate::executor::{ExecContext, ExecStatus, ExecTask, Executor, ExecutorResult};
use crate::locks::LockManager;

/// Subtask lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubtaskStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

/// One unit of a decomposed prompt
#[derive(Debug, Clone)]
pub struct SubtaskDefinition {
    pub subtask_id: String,
    pub parent_task_id: String,
    pub prompt: String,
    /// Subtask ids that must complete before this one starts
    pub dependencies: Vec<String>,
    pub execution_order: u32,
    pub status: SubtaskStatus,
    pub retry_count: u32,
    pub result: Option<ExecutorResult>,
}

impl SubtaskDefinition {
    fn new(parent_task_id: &str, index: usize, prompt: String, dependencies: Vec<String>) -> Self {
        Self {
            subtask_id: format!("{}-sub-{}", parent_task_id, index + 1),
            parent_task_id: parent_task_id.to_string(),
            prompt,
            dependencies,
            execution_order: index as u32,
            status: SubtaskStatus::Pending,
            retry_count: 0,
            result: None,
        }
    }
}

/// Chunking wrapper: splits decomposable prompts and runs everything else
/// straight through to the next executor
pub struct ChunkingExecutor {
    next: Arc<dyn Executor>,
    locks: Arc<LockManager>,
    config: ChunkingConfig,
}

impl ChunkingExecutor {
    pub fn new(next: Arc<dyn Executor>, locks: Arc<LockManager>, config: ChunkingConfig) -> Self {
        Self { next, locks, config }
    }

    /// Build subtask definitions from the analysed items. Sequential mode
    /// chains each subtask onto its predecessor.
    fn build_subtasks(task: &ExecTask, analysis: &ChunkAnalysis) -> Vec<SubtaskDefinition> {
        let mut defs = Vec::with_capacity(analysis.items.len());
        for (index, item) in analysis.items.iter().enumerate() {
            let dependencies = if analysis.mode == ExecutionMode::Sequential && index > 0 {
                vec![format!("{}-sub-{}", task.task_id, index)]
            } else {
                Vec::new()
            };
            defs.push(SubtaskDefinition::new(&task.task_id, index, item.clone(), dependencies));
        }
        defs
    }

    async fn run_sequential(
        &self,
        mut defs: Vec<SubtaskDefinition>,
        task: &ExecTask,
        ctx: &ExecContext,
    ) -> Vec<SubtaskDefinition> {
        for def in defs.iter_mut() {
            if ctx.cancelled() {
                debug!(subtask = %def.subtask_id, "Cancel observed, leaving subtask pending");
                break;
            }
            run_subtask(self.next.clone(), &self.config, def, task, ctx).await;
            if def.status == SubtaskStatus::Failed && self.config.fail_fast {
                warn!(subtask = %def.subtask_id, "Subtask failed, stopping (fail-fast)");
                break;
            }
        }
        defs
    }

    async fn run_parallel(
        &self,
        defs: Vec<SubtaskDefinition>,
        task: &ExecTask,
        ctx: &ExecContext,
    ) -> Vec<SubtaskDefinition> {
        // The parent execution already holds one permit; widen with any
        // spare permits so chunked parallelism stays inside the global
        // executor limit.
        let mut extras: Vec<String> = Vec::new();
        while extras.len() + 1 < defs.len() {
            let permit_id = format!("{}-width-{}", task.task_id, extras.len());
            match self.locks.acquire_semaphore(&permit_id).await {
                Ok(()) => extras.push(permit_id),
                Err(_) => break,
            }
        }
        let width = extras.len() + 1;
        info!(parent = %task.task_id, subtasks = defs.len(), width, "Running chunked subtasks in parallel");

        let aborted = Arc::new(AtomicBool::new(false));
        let fail_fast = self.config.fail_fast;

        let mut finished: Vec<SubtaskDefinition> = stream::iter(defs.into_iter().map(|mut def| {
            let next = self.next.clone();
            let config = self.config.clone();
            let base = task.clone();
            let ctx = ctx.clone();
            let aborted = aborted.clone();
            async move {
                if aborted.load(Ordering::SeqCst) || ctx.cancelled() {
                    return def;
                }
                run_subtask(next, &config, &mut def, &base, &ctx).await;
                if def.status == SubtaskStatus::Failed && fail_fast {
                    aborted.store(true, Ordering::SeqCst);
                }
                def
            }
        }))
        .buffer_unordered(width)
        .collect()
        .await;

        for permit_id in extras {
            self.locks.release_semaphore(&permit_id).await;
        }

        finished.sort_by_key(|d| d.execution_order);
        finished
    }

    /// Fold the terminal subtasks into one parent result
    fn aggregate(task: &ExecTask, defs: &[SubtaskDefinition], started: Instant) -> ExecutorResult {
        let mut parent = ExecutorResult::empty(ExecStatus::Complete);
        parent.duration_ms = started.elapsed().as_millis() as u64;

        let mut outputs = Vec::new();
        let mut failed: Vec<&SubtaskDefinition> = Vec::new();

        for def in defs {
            if def.status != SubtaskStatus::Complete {
                failed.push(def);
            }
            let Some(result) = &def.result else { continue };
            parent.executed |= result.executed;
            if !result.output.is_empty() {
                outputs.push(result.output.clone());
            }
            for file in &result.files_modified {
                if !parent.files_modified.contains(file) {
                    parent.files_modified.push(file.clone());
                }
            }
            for verified in &result.verified_files {
                if !parent.verified_files.iter().any(|v| v.path == verified.path) {
                    parent.verified_files.push(verified.clone());
                }
            }
            parent.file_previews.extend(result.file_previews.iter().cloned());
        }
        parent.output = outputs.join("\n\n");
        parent.unverified_files = parent
            .files_modified
            .iter()
            .filter(|f| !parent.verified_files.iter().any(|v| v.path.as_str() == f.as_str()))
            .cloned()
            .collect();

        if !failed.is_empty() {
            parent.status = ExecStatus::Error;
            parent.error = Some(format!(
                "{} of {} subtasks did not complete: {}",
                failed.len(),
                defs.len(),
                failed.iter().map(|d| d.subtask_id.as_str()).collect::<Vec<_>>().join(", ")
            ));
        }

        info!(
            parent_task = %task.task_id,
            subtasks = defs.len(),
            failed = failed.len(),
            status = ?parent.status,
            "Chunked execution aggregated"
        );
        parent
    }
}

#[async_trait]
impl Executor for ChunkingExecutor {
    async fn execute(&self, task: &ExecTask, ctx: &ExecContext) -> ExecutorResult {
        let analysis = analyze_prompt(&task.prompt, &self.config);
        if !analysis.decomposable {
            return self.next.execute(task, ctx).await;
        }

        let started = Instant::now();
        info!(
            task_id = %task.task_id,
            subtasks = analysis.items.len(),
            mode = ?analysis.mode,
            "Decomposing prompt into subtasks"
        );

        let defs = Self::build_subtasks(task, &analysis);
        let finished = match analysis.mode {
            ExecutionMode::Sequential => self.run_sequential(defs, task, ctx).await,
            ExecutionMode::Parallel => self.run_parallel(defs, task, ctx).await,
        };

        Self::aggregate(task, &finished, started)
    }
}

/// Run one subtask with bounded retry and exponential backoff. Retries on
/// INCOMPLETE, ERROR and timeouts; a cancel observed between attempts
/// discards the pending retry.
async fn run_subtask(
    next: Arc<dyn Executor>,
    config: &ChunkingConfig,
    def: &mut SubtaskDefinition,
    parent: &ExecTask,
    ctx: &ExecContext,
) {
    def.status = SubtaskStatus::Running;
    let sub_task = ExecTask {
        task_id: def.subtask_id.clone(),
        session_id: parent.session_id.clone(),
        prompt: def.prompt.clone(),
        task_type: parent.task_type,
        created_at: now_ms(),
        user_reply: None,
        profile: parent.profile,
    };

    loop {
        let result = next.execute(&sub_task, ctx).await;
        let retryable =
            matches!(result.status, ExecStatus::Incomplete | ExecStatus::Error) || result.timed_out();

        if result.status == ExecStatus::Complete {
            def.status = SubtaskStatus::Complete;
            def.result = Some(result);
            return;
        }

        if !retryable || def.retry_count >= config.max_retries || ctx.cancelled() {
            warn!(subtask = %def.subtask_id, status = ?result.status, retries = def.retry_count, "Subtask failed");
            def.status = SubtaskStatus::Failed;
            def.result = Some(result);
            return;
        }

        let backoff_ms = (config.retry_delay_ms as f64 * config.retry_multiplier.powi(def.retry_count as i32)) as u64;
        let jitter_ms = rand::rng().random_range(0..=backoff_ms / 10 + 1);
        def.retry_count += 1;
        debug!(subtask = %def.subtask_id, attempt = def.retry_count, backoff_ms, "Retrying subtask");
        tokio::time::sleep(Duration::from_millis(backoff_ms + jitter_ms)).await;
    }
}
