//! Review loop
//!
//! Wraps the next executor and iterates on its result: PASS accepts,
//! REJECT composes a corrective re-prompt naming every failed criterion,
//! RETRY re-submits the unchanged prompt after a fixed delay. Iterations
//! are bounded; every step is recorded to the task's trace.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ReviewConfig;
use crate::executor::{ExecContext, ExecStatus, ExecTask, Executor, ExecutorResult};
use crate::trace::{TraceHandle, TraceWriter};

use super::criteria::Criterion;
use super::goal_drift::GoalDriftCriterion;

/// Verdict on one executor result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Judgment {
    Pass,
    Reject,
    Retry,
}

/// One recorded review iteration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewIteration {
    pub index: u32,
    pub judgment: Judgment,
    pub failed_criteria: Vec<String>,
    pub modification_prompt: Option<String>,
}

/// Events emitted to the trace while the loop runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ReviewEvent {
    #[serde(rename = "REVIEW_LOOP_START")]
    LoopStart { task_id: String, max_iterations: u32 },
    #[serde(rename = "REVIEW_ITERATION_START")]
    IterationStart { iteration: u32 },
    #[serde(rename = "QUALITY_JUDGMENT")]
    QualityJudgment {
        iteration: u32,
        judgment: Judgment,
        failed_criteria: Vec<String>,
    },
    #[serde(rename = "REJECTION_DETAILS")]
    RejectionDetails { iteration: u32, details: Vec<String> },
    #[serde(rename = "MODIFICATION_PROMPT")]
    ModificationPrompt { iteration: u32, prompt: String },
    #[serde(rename = "REVIEW_ITERATION_END")]
    IterationEnd { iteration: u32 },
    #[serde(rename = "REVIEW_LOOP_END")]
    LoopEnd {
        task_id: String,
        total_iterations: u32,
        final_judgment: Judgment,
    },
}

/// Quality-gate wrapper around the next executor
pub struct ReviewLoop {
    next: Arc<dyn Executor>,
    config: ReviewConfig,
    trace: Option<Arc<TraceWriter>>,
}

impl ReviewLoop {
    pub fn new(next: Arc<dyn Executor>, config: ReviewConfig, trace: Option<Arc<TraceWriter>>) -> Self {
        Self { next, config, trace }
    }

    /// Judge one result: transient failures retry, structural failures
    /// reject with the list of criteria that failed. Clarification
    /// questions pass through untouched - they pause the task for the
    /// user rather than re-prompt the executor.
    fn judge(&self, task: &ExecTask, result: &ExecutorResult) -> (Judgment, Vec<FailedCriterion>) {
        if matches!(
            result.status,
            ExecStatus::Error | ExecStatus::Blocked | ExecStatus::Incomplete
        ) {
            return (Judgment::Retry, Vec::new());
        }

        if result.status == ExecStatus::AwaitingResponse {
            return (Judgment::Pass, Vec::new());
        }
        if matches!(task.task_type, queuestore::TaskType::ReadInfo | queuestore::TaskType::Report)
            && super::contains_clarification_question(&result.output)
        {
            return (Judgment::Pass, Vec::new());
        }

        let mut failed: Vec<FailedCriterion> = Criterion::ALL
            .iter()
            .filter(|c| !c.evaluate(result))
            .map(|c| FailedCriterion {
                id: c.id(),
                description: c.description().to_string(),
            })
            .collect();

        if self.config.goal_drift_guard {
            for gd in GoalDriftCriterion::ALL {
                let passed = match gd.evaluate(result) {
                    Ok(passed) => passed,
                    Err(e) => {
                        // Fail closed: an evaluation error rejects
                        warn!(criterion = gd.id(), error = %e, "Goal-drift evaluation error");
                        false
                    }
                };
                if !passed {
                    let mapped = gd.maps_to();
                    if !failed.iter().any(|f| f.id == mapped.id()) {
                        failed.push(FailedCriterion {
                            id: mapped.id(),
                            description: format!("{} ({})", mapped.description(), gd.id()),
                        });
                    }
                }
            }
        }

        if failed.is_empty() {
            (Judgment::Pass, failed)
        } else {
            (Judgment::Reject, failed)
        }
    }

    fn build_modification_prompt(original: &str, failed: &[FailedCriterion]) -> String {
        let mut prompt = String::from("The previous attempt was rejected by quality review.\nFailed criteria:\n");
        for f in failed {
            prompt.push_str(&format!("- {}: {}\n", f.id, f.description));
        }
        prompt.push_str("\nRedo the task and resolve every issue above.\n\n[Original task]\n");
        prompt.push_str(original);
        prompt
    }

    fn emit(handle: &Option<TraceHandle>, event: &ReviewEvent) {
        if let Some(handle) = handle {
            if let Err(e) = handle.append(event) {
                warn!(error = %e, "Failed to write review trace");
            }
        }
    }
}

struct FailedCriterion {
    id: &'static str,
    description: String,
}

#[async_trait]
impl Executor for ReviewLoop {
    async fn execute(&self, task: &ExecTask, ctx: &ExecContext) -> ExecutorResult {
        let handle = self.trace.as_ref().and_then(|t| t.begin(&task.task_id).ok());
        Self::emit(
            &handle,
            &ReviewEvent::LoopStart {
                task_id: task.task_id.clone(),
                max_iterations: self.config.max_iterations,
            },
        );

        let mut current = task.clone();
        let mut iterations: Vec<ReviewIteration> = Vec::new();
        let mut last_result: Option<ExecutorResult> = None;
        let mut last_failed: Vec<String> = Vec::new();

        for index in 1..=self.config.max_iterations {
            Self::emit(&handle, &ReviewEvent::IterationStart { iteration: index });

            let result = self.next.execute(&current, ctx).await;
            let (judgment, failed) = self.judge(task, &result);
            let failed_ids: Vec<String> = failed.iter().map(|f| f.id.to_string()).collect();

            Self::emit(
                &handle,
                &ReviewEvent::QualityJudgment {
                    iteration: index,
                    judgment,
                    failed_criteria: failed_ids.clone(),
                },
            );
            debug!(task_id = %task.task_id, iteration = index, ?judgment, ?failed_ids, "Quality judgment");

            match judgment {
                Judgment::Pass => {
                    iterations.push(ReviewIteration {
                        index,
                        judgment,
                        failed_criteria: failed_ids,
                        modification_prompt: None,
                    });
                    Self::emit(&handle, &ReviewEvent::IterationEnd { iteration: index });
                    Self::emit(
                        &handle,
                        &ReviewEvent::LoopEnd {
                            task_id: task.task_id.clone(),
                            total_iterations: index,
                            final_judgment: Judgment::Pass,
                        },
                    );
                    info!(task_id = %task.task_id, iterations = index, "Review passed");
                    return result;
                }
                Judgment::Retry => {
                    iterations.push(ReviewIteration {
                        index,
                        judgment,
                        failed_criteria: failed_ids.clone(),
                        modification_prompt: None,
                    });
                    last_result = Some(result);
                    last_failed = failed_ids;
                    Self::emit(&handle, &ReviewEvent::IterationEnd { iteration: index });
                    if index < self.config.max_iterations {
                        tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                    }
                    // Retry resubmits the unchanged prompt
                }
                Judgment::Reject => {
                    Self::emit(
                        &handle,
                        &ReviewEvent::RejectionDetails {
                            iteration: index,
                            details: failed.iter().map(|f| format!("{}: {}", f.id, f.description)).collect(),
                        },
                    );
                    let modification = Self::build_modification_prompt(&task.prompt, &failed);
                    Self::emit(
                        &handle,
                        &ReviewEvent::ModificationPrompt {
                            iteration: index,
                            prompt: modification.clone(),
                        },
                    );
                    iterations.push(ReviewIteration {
                        index,
                        judgment,
                        failed_criteria: failed_ids.clone(),
                        modification_prompt: Some(modification.clone()),
                    });
                    last_result = Some(result);
                    last_failed = failed_ids;
                    Self::emit(&handle, &ReviewEvent::IterationEnd { iteration: index });
                    current = current.with_prompt(modification);
                }
            }
        }

        let total = iterations.len() as u32;
        Self::emit(
            &handle,
            &ReviewEvent::LoopEnd {
                task_id: task.task_id.clone(),
                total_iterations: total,
                final_judgment: iterations.last().map(|i| i.judgment).unwrap_or(Judgment::Retry),
            },
        );
        warn!(task_id = %task.task_id, total, "Review loop exhausted");

        let mut result = last_result.unwrap_or_else(|| ExecutorResult::error("review loop produced no result"));

        // A blocked result survives the bound unchanged so the scheduler can
        // apply the DANGEROUS_OP policy to it
        if result.status == ExecStatus::Blocked {
            return result;
        }

        result.status = if self.config.escalate_on_max {
            ExecStatus::Incomplete
        } else {
            ExecStatus::Error
        };
        let detail = if last_failed.is_empty() {
            "transient executor failures".to_string()
        } else {
            format!("failed criteria: {}", last_failed.join(", "))
        };
        result.error = Some(format!(
            "review loop exhausted after {} iterations ({})",
            total, detail
        ));
        result
    }
}
