//! Scripted executor for tests
//!
//! Plays back a queue of canned results, recording the tasks it was asked
//! to run. When the script runs dry it returns a plain COMPLETE result.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::{ExecContext, ExecTask, Executor, ExecutorResult};

/// Executor that returns pre-scripted results in order
pub struct ScriptedExecutor {
    results: Mutex<VecDeque<ExecutorResult>>,
    calls: Mutex<Vec<ExecTask>>,
}

impl ScriptedExecutor {
    pub fn new(results: Vec<ExecutorResult>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// The tasks this executor has been asked to run, in order
    pub fn calls(&self) -> Vec<ExecTask> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of executions so far
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn execute(&self, task: &ExecTask, _ctx: &ExecContext) -> ExecutorResult {
        self.calls.lock().unwrap().push(task.clone());
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ExecutorResult::complete("scripted default"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecStatus;
    use queuestore::TaskType;

    fn task(prompt: &str) -> ExecTask {
        ExecTask {
            task_id: "t1".to_string(),
            session_id: "s1".to_string(),
            prompt: prompt.to_string(),
            task_type: TaskType::Implementation,
            created_at: 0,
            user_reply: None,
            profile: None,
        }
    }

    #[tokio::test]
    async fn test_plays_back_in_order() {
        let exec = ScriptedExecutor::new(vec![
            ExecutorResult::error("first fails"),
            ExecutorResult::complete("second works"),
        ]);
        let (ctx, _cancel, _events) = ExecContext::detached();

        let first = exec.execute(&task("a"), &ctx).await;
        let second = exec.execute(&task("b"), &ctx).await;
        let third = exec.execute(&task("c"), &ctx).await;

        assert_eq!(first.status, ExecStatus::Error);
        assert_eq!(second.status, ExecStatus::Complete);
        assert_eq!(third.output, "scripted default");
        assert_eq!(exec.call_count(), 3);
        assert_eq!(exec.calls()[1].prompt, "b");
    }
}
