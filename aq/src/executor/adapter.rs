//! Executor adapter
//!
//! Spawns the child executor for one task, drives its standard streams,
//! and produces an [`ExecutorResult`]. Supervision is split into three
//! cooperating units: the stream readers, a supervisor task that owns the
//! child process, and the termination selector below. The first of
//! {process exit, hard deadline, user cancel} wins and is the sole
//! termination source; idle expiry returns without touching the child.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use queuestore::{now_ms, ProgressEvent};

use crate::config::ExecutorConfig;

use super::preflight::run_preflight;
use super::result::{ExecStatus, ExecutorResult, FilePreview, TerminatedBy, VerifiedFile};
use super::stream::{is_stale, OutputChunk, OutputRing, StdStream};
use super::timeout::{TimeoutKind, TimeoutProfiles, TimeoutWatch};
use super::{ExecContext, ExecTask, Executor};

/// How much of a verified file the quality gates get to see
const PREVIEW_BYTES: usize = 2_048;

/// Kept in the paused task's output when the run goes idle
const IDLE_QUESTION: &str = "The executor has produced no progress within the idle window. \
     Reply to resume the task, or cancel it.";

/// Optional JSON object on the final stdout line of a well-behaved executor
#[derive(Debug, Default, Deserialize)]
struct FinalReport {
    status: Option<ExecStatus>,
    #[serde(default)]
    files_modified: Vec<String>,
    #[serde(default)]
    blocked_reason: Option<String>,
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

enum ChildCommand {
    /// Graceful-then-forceful shutdown
    Terminate,
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    HardTimeout,
    IdleTimeout,
    Cancelled,
}

/// Spawns and supervises the child executor
pub struct ExecutorAdapter {
    config: ExecutorConfig,
    profiles: TimeoutProfiles,
    chunk_tx: broadcast::Sender<OutputChunk>,
}

impl ExecutorAdapter {
    pub fn new(config: ExecutorConfig, profiles: TimeoutProfiles) -> Self {
        let (chunk_tx, _) = broadcast::channel(256);
        Self {
            config,
            profiles,
            chunk_tx,
        }
    }

    /// Subscribe to the live tagged output stream
    pub fn subscribe(&self) -> broadcast::Receiver<OutputChunk> {
        self.chunk_tx.subscribe()
    }

    fn workdir(&self) -> PathBuf {
        self.config
            .workdir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    fn compose_prompt(task: &ExecTask) -> String {
        match &task.user_reply {
            Some(reply) => format!("{}\n\n[User reply]\n{}", task.prompt, reply),
            None => task.prompt.clone(),
        }
    }

    /// Re-stat claimed files and split them into verified/unverified
    fn verify_files(workdir: &Path, files_modified: &[String]) -> (Vec<VerifiedFile>, Vec<String>, Vec<FilePreview>) {
        let mut verified = Vec::new();
        let mut unverified = Vec::new();
        let mut previews = Vec::new();

        for file in files_modified {
            let path = workdir.join(file);
            match std::fs::metadata(&path) {
                Ok(meta) if meta.is_file() => {
                    verified.push(VerifiedFile {
                        path: file.clone(),
                        exists: true,
                        size: meta.len(),
                    });
                    if let Ok(content) = std::fs::read_to_string(&path) {
                        let head: String = content.chars().take(PREVIEW_BYTES).collect();
                        previews.push(FilePreview {
                            path: file.clone(),
                            head,
                        });
                    }
                }
                _ => unverified.push(file.clone()),
            }
        }

        (verified, unverified, previews)
    }

    /// Assemble the result for a run that ended with a child exit
    fn assemble_exit(
        &self,
        task: &ExecTask,
        exit: std::io::Result<std::process::ExitStatus>,
        chunks: &[OutputChunk],
        duration_ms: u64,
    ) -> ExecutorResult {
        let mut result = ExecutorResult::empty(ExecStatus::Complete);
        result.executed = true;
        result.duration_ms = duration_ms;
        result.terminated_by = Some(TerminatedBy::ProcessExit);

        let fresh: Vec<&OutputChunk> = chunks
            .iter()
            .filter(|c| !is_stale(c, &task.task_id, &task.session_id, task.created_at))
            .collect();

        let stdout_lines: Vec<&str> = fresh
            .iter()
            .filter(|c| c.stream == StdStream::Stdout)
            .map(|c| c.content.as_str())
            .collect();
        let stderr_tail: Vec<&str> = fresh
            .iter()
            .filter(|c| c.stream == StdStream::Stderr)
            .rev()
            .take(20)
            .map(|c| c.content.as_str())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();

        let report = stdout_lines
            .iter()
            .rev()
            .find(|l| !l.trim().is_empty())
            .and_then(|l| serde_json::from_str::<FinalReport>(l).ok())
            .filter(|r| r.status.is_some() || r.question.is_some());

        // The transcript excludes the machine-readable report line
        let transcript_end = if report.is_some() {
            stdout_lines.len().saturating_sub(1)
        } else {
            stdout_lines.len()
        };
        result.output = stdout_lines[..transcript_end].join("\n");

        let exit_status = match exit {
            Ok(status) => status,
            Err(e) => {
                result.status = ExecStatus::Error;
                result.error = Some(format!("failed to reap executor: {}", e));
                return result;
            }
        };

        match report {
            Some(report) => {
                result.files_modified = report.files_modified;
                let (verified, unverified, previews) = Self::verify_files(&self.workdir(), &result.files_modified);
                result.verified_files = verified;
                result.unverified_files = unverified;
                result.file_previews = previews;

                match report.status {
                    Some(ExecStatus::Blocked) => {
                        result.status = ExecStatus::Blocked;
                        result.blocked_reason = report.blocked_reason.or(report.question);
                    }
                    Some(ExecStatus::AwaitingResponse) => {
                        result.status = ExecStatus::AwaitingResponse;
                        if let Some(question) = report.question {
                            result.output = question;
                        }
                    }
                    Some(status) => {
                        result.status = status;
                        result.error = report.error;
                    }
                    None => {
                        // A bare question is a clarification request
                        result.status = ExecStatus::AwaitingResponse;
                        if let Some(question) = report.question {
                            result.output = question;
                        }
                    }
                }
            }
            None => {
                if exit_status.success() {
                    result.status = ExecStatus::Complete;
                } else {
                    result.status = ExecStatus::Error;
                    let tail = stderr_tail.join("\n");
                    result.error = Some(if tail.is_empty() {
                        format!("executor exited with code {}", exit_status.code().unwrap_or(-1))
                    } else {
                        tail
                    });
                }
            }
        }

        result
    }
}

#[async_trait]
impl Executor for ExecutorAdapter {
    async fn execute(&self, task: &ExecTask, ctx: &ExecContext) -> ExecutorResult {
        let started = Instant::now();
        let started_ms = now_ms();

        if let Err(e) = run_preflight(&self.config) {
            warn!(task_id = %task.task_id, error = %e, "Preflight failed closed");
            let mut result = ExecutorResult::error(e.to_string());
            result.terminated_by = Some(TerminatedBy::PreflightFailClosed);
            result.duration_ms = started.elapsed().as_millis() as u64;
            return result;
        }

        let (profile_kind, profile) = self.profiles.profile_for(task);
        let mut watch = TimeoutWatch::new(profile, task.created_at, started_ms);
        debug!(task_id = %task.task_id, ?profile_kind, "Launching executor");

        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .env("AQ_TASK_ID", &task.task_id)
            .env("AQ_SESSION_ID", &task.session_id)
            .current_dir(self.workdir())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let mut result = ExecutorResult::error(format!("failed to spawn executor: {}", e));
                result.duration_ms = started.elapsed().as_millis() as u64;
                return result;
            }
        };

        // Feed the prompt on stdin
        let prompt = Self::compose_prompt(task);
        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                let _ = stdin.write_all(prompt.as_bytes()).await;
                let _ = stdin.shutdown().await;
            });
        }

        // Unit 1: stream readers
        let ring = Arc::new(Mutex::new(OutputRing::new(self.config.ring_capacity)));
        let (progress_tx, mut progress_rx) = mpsc::channel::<i64>(256);
        let mut reader_handles = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            reader_handles.push(tokio::spawn(read_stream(
                stdout,
                StdStream::Stdout,
                task.task_id.clone(),
                task.session_id.clone(),
                ring.clone(),
                self.chunk_tx.clone(),
                ctx.events.clone(),
                progress_tx.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            reader_handles.push(tokio::spawn(read_stream(
                stderr,
                StdStream::Stderr,
                task.task_id.clone(),
                task.session_id.clone(),
                ring.clone(),
                self.chunk_tx.clone(),
                ctx.events.clone(),
                progress_tx.clone(),
            )));
        }
        drop(progress_tx);

        // Unit 2: the supervisor owns the child; termination requests
        // arrive over a channel so there is exactly one kill path
        let grace = Duration::from_millis(self.config.grace_period_ms);
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<ChildCommand>(1);
        let (exit_tx, exit_rx) = oneshot::channel();
        tokio::spawn(async move {
            let mut cmd_open = true;
            let status = loop {
                let mut do_terminate = false;
                tokio::select! {
                    status = child.wait() => break status,
                    cmd = cmd_rx.recv(), if cmd_open => {
                        match cmd {
                            Some(ChildCommand::Terminate) => do_terminate = true,
                            None => cmd_open = false,
                        }
                    }
                }
                if do_terminate {
                    break terminate_child(&mut child, grace).await;
                }
            };
            let _ = exit_tx.send(status);
        });

        // Unit 3: termination selector
        let hard_deadline = tokio::time::Instant::now() + profile.hard;
        let mut tick = tokio::time::interval(Duration::from_millis(100));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut cancel = ctx.cancel.clone();
        let mut cancel_open = true;
        let mut progress_open = true;
        let mut exit_rx = exit_rx;

        let outcome = loop {
            tokio::select! {
                status = &mut exit_rx => {
                    break Outcome::Exited(status.unwrap_or_else(|_| {
                        Err(std::io::Error::other("executor supervisor vanished"))
                    }));
                }
                _ = tokio::time::sleep_until(hard_deadline) => break Outcome::HardTimeout,
                changed = cancel.changed(), if cancel_open => {
                    match changed {
                        Ok(()) if *cancel.borrow() => break Outcome::Cancelled,
                        Ok(()) => {}
                        Err(_) => cancel_open = false,
                    }
                }
                maybe_ts = progress_rx.recv(), if progress_open => {
                    match maybe_ts {
                        Some(ts) => watch.note_progress(ts),
                        None => progress_open = false,
                    }
                }
                _ = tick.tick() => {
                    if watch.check(now_ms()) == Some(TimeoutKind::Idle) {
                        break Outcome::IdleTimeout;
                    }
                }
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Outcome::Exited(exit) => {
                for handle in reader_handles {
                    let _ = handle.await;
                }
                let chunks = ring.lock().await.snapshot();
                let result = self.assemble_exit(task, exit, &chunks, duration_ms);
                info!(task_id = %task.task_id, status = ?result.status, duration_ms, "Executor finished");
                result
            }
            Outcome::HardTimeout => {
                let _ = cmd_tx.send(ChildCommand::Terminate).await;
                let _ = tokio::time::timeout(grace + Duration::from_secs(1), exit_rx).await;
                let chunks = ring.lock().await.snapshot();
                let mut result = ExecutorResult::error(format!(
                    "TIMEOUT: hard deadline of {:?} exceeded",
                    profile.hard
                ));
                result.executed = true;
                result.output = collect_stdout(task, &chunks);
                result.duration_ms = duration_ms;
                result.terminated_by = Some(TerminatedBy::HardTimeout);
                warn!(task_id = %task.task_id, "Executor hit hard deadline");
                result
            }
            Outcome::Cancelled => {
                let _ = cmd_tx.send(ChildCommand::Terminate).await;
                let _ = tokio::time::timeout(grace + Duration::from_secs(1), exit_rx).await;
                let chunks = ring.lock().await.snapshot();
                let mut result = ExecutorResult::error("cancelled by user");
                result.executed = true;
                result.output = collect_stdout(task, &chunks);
                result.duration_ms = duration_ms;
                result.terminated_by = Some(TerminatedBy::Cancelled);
                info!(task_id = %task.task_id, "Executor cancelled");
                result
            }
            Outcome::IdleTimeout => {
                // The child keeps running: silence alone never kills it.
                // A detached reaper enforces the hard deadline on the orphan.
                let remaining = watch.hard_remaining(now_ms());
                let reaper_tx = cmd_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(remaining).await;
                    let _ = reaper_tx.send(ChildCommand::Terminate).await;
                });

                // Stop tailing the orphan. The readers hold progress-event
                // senders; left alive they would pin the caller's event
                // stream open until the child finally dies.
                for handle in reader_handles {
                    handle.abort();
                }

                let mut result = ExecutorResult::empty(ExecStatus::AwaitingResponse);
                result.executed = true;
                result.output = IDLE_QUESTION.to_string();
                result.error = Some(format!("TIMEOUT: idle for {:?} without progress", profile.idle));
                result.duration_ms = duration_ms;
                result.terminated_by = Some(TerminatedBy::IdleTimeout);
                warn!(task_id = %task.task_id, "Executor idle; pausing task for user input");
                result
            }
        }
    }
}

/// Join the fresh stdout chunks of a partial transcript
fn collect_stdout(task: &ExecTask, chunks: &[OutputChunk]) -> String {
    chunks
        .iter()
        .filter(|c| c.stream == StdStream::Stdout)
        .filter(|c| !is_stale(c, &task.task_id, &task.session_id, task.created_at))
        .map(|c| c.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// SIGTERM, wait out the grace period, then SIGKILL
async fn terminate_child(child: &mut Child, grace: Duration) -> std::io::Result<std::process::ExitStatus> {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!("Executor ignored SIGTERM, killing");
            let _ = child.kill().await;
            child.wait().await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn read_stream<R: tokio::io::AsyncRead + Unpin>(
    reader: R,
    stream: StdStream,
    task_id: String,
    session_id: String,
    ring: Arc<Mutex<OutputRing>>,
    chunks: broadcast::Sender<OutputChunk>,
    events: mpsc::Sender<ProgressEvent>,
    progress: mpsc::Sender<i64>,
) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let chunk = OutputChunk::new(&task_id, &session_id, stream, &line);
        ring.lock().await.push(chunk.clone());
        let _ = chunks.send(chunk);

        let event = match line.strip_prefix("PROGRESS:") {
            Some(rest) => {
                let data = serde_json::from_str(rest.trim())
                    .unwrap_or_else(|_| serde_json::Value::String(rest.trim().to_string()));
                ProgressEvent::tool_progress(&task_id, &session_id, data)
            }
            None => ProgressEvent::log_chunk(&task_id, &session_id, &line),
        };
        let _ = progress.send(event.timestamp).await;
        let _ = events.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProfileConfig, TimeoutsConfig};
    use queuestore::TaskType;
    use tempfile::tempdir;

    fn shell_config(script: &str, workdir: Option<PathBuf>) -> ExecutorConfig {
        ExecutorConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            workdir,
            auth_env: None,
            grace_period_ms: 200,
            ..ExecutorConfig::default()
        }
    }

    fn fast_profiles(idle_ms: u64, hard_ms: u64) -> TimeoutProfiles {
        let p = ProfileConfig { idle_ms, hard_ms };
        TimeoutProfiles::from_config(&TimeoutsConfig {
            standard: p,
            long: p,
            extended: p,
        })
    }

    fn task(prompt: &str) -> ExecTask {
        ExecTask {
            task_id: "t1".to_string(),
            session_id: "s1".to_string(),
            prompt: prompt.to_string(),
            task_type: TaskType::Implementation,
            created_at: now_ms(),
            user_reply: None,
            profile: Some(super::super::timeout::ProfileKind::Standard),
        }
    }

    #[tokio::test]
    async fn test_happy_path_with_report() {
        let temp = tempdir().unwrap();
        let script = r#"cat > /dev/null
echo "creating file"
echo hello > hello.txt
echo '{"status":"COMPLETE","files_modified":["hello.txt"]}'"#;
        let adapter = ExecutorAdapter::new(
            shell_config(script, Some(temp.path().to_path_buf())),
            fast_profiles(5_000, 20_000),
        );
        let (ctx, _cancel, _events) = ExecContext::detached();

        let result = adapter.execute(&task("write hello.txt"), &ctx).await;

        assert_eq!(result.status, ExecStatus::Complete);
        assert!(result.executed);
        assert_eq!(result.terminated_by, Some(TerminatedBy::ProcessExit));
        assert_eq!(result.files_modified, vec!["hello.txt"]);
        assert_eq!(result.verified_files.len(), 1);
        assert!(result.verified_files[0].exists);
        assert_eq!(result.verified_files[0].size, 6);
        assert!(result.unverified_files.is_empty());
        assert!(result.output.contains("creating file"));
        // The report line is not part of the transcript
        assert!(!result.output.contains("files_modified"));
    }

    #[tokio::test]
    async fn test_unverified_files_split() {
        let temp = tempdir().unwrap();
        let script = r#"echo made > real.txt
echo '{"status":"COMPLETE","files_modified":["real.txt","ghost.txt"]}'"#;
        let adapter = ExecutorAdapter::new(
            shell_config(script, Some(temp.path().to_path_buf())),
            fast_profiles(5_000, 20_000),
        );
        let (ctx, _cancel, _events) = ExecContext::detached();

        let result = adapter.execute(&task("do work"), &ctx).await;

        assert_eq!(result.verified_files.len(), 1);
        assert_eq!(result.verified_files[0].path, "real.txt");
        assert_eq!(result.unverified_files, vec!["ghost.txt"]);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_error_with_stderr_tail() {
        let adapter = ExecutorAdapter::new(
            shell_config("echo 'boom' >&2; exit 3", None),
            fast_profiles(5_000, 20_000),
        );
        let (ctx, _cancel, _events) = ExecContext::detached();

        let result = adapter.execute(&task("fail"), &ctx).await;

        assert_eq!(result.status, ExecStatus::Error);
        assert_eq!(result.terminated_by, Some(TerminatedBy::ProcessExit));
        assert!(result.error.as_deref().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_preflight_failure_is_never_timeout() {
        let mut config = shell_config("true", None);
        config.command = "definitely-not-a-binary-xyz".to_string();
        let adapter = ExecutorAdapter::new(config, fast_profiles(50, 100));
        let (ctx, _cancel, _events) = ExecContext::detached();

        let result = adapter.execute(&task("anything"), &ctx).await;

        assert_eq!(result.status, ExecStatus::Error);
        assert!(!result.executed);
        assert_eq!(result.terminated_by, Some(TerminatedBy::PreflightFailClosed));
        assert!(result.error.as_deref().unwrap().starts_with("CONFIG_ERROR"));
        assert!(!result.timed_out());
    }

    #[tokio::test]
    async fn test_hard_deadline_terminates() {
        let adapter = ExecutorAdapter::new(shell_config("sleep 10", None), fast_profiles(10_000, 300));
        let (ctx, _cancel, _events) = ExecContext::detached();

        let started = Instant::now();
        let result = adapter.execute(&task("sleep forever"), &ctx).await;

        assert_eq!(result.status, ExecStatus::Error);
        assert_eq!(result.terminated_by, Some(TerminatedBy::HardTimeout));
        assert!(result.error.as_deref().unwrap().contains("TIMEOUT"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_idle_pauses_without_killing() {
        // Freeze with no output: idle fires, run pauses as a question
        let adapter = ExecutorAdapter::new(shell_config("sleep 10", None), fast_profiles(300, 10_000));
        let (ctx, _cancel, mut events) = ExecContext::detached();

        let mut idle_task = task("quiet work");
        idle_task.created_at = now_ms();
        let started = Instant::now();
        let result = adapter.execute(&idle_task, &ctx).await;

        assert_eq!(result.status, ExecStatus::AwaitingResponse);
        assert_eq!(result.terminated_by, Some(TerminatedBy::IdleTimeout));
        assert!(!result.output.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));

        // The readers were torn down with the run: the event stream closes
        // now, not when the orphan finally exits
        drop(ctx);
        let drained = tokio::time::timeout(Duration::from_secs(1), async {
            while events.recv().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok(), "event stream stayed open after idle pause");
    }

    #[tokio::test]
    async fn test_cancel_terminates() {
        let adapter = ExecutorAdapter::new(shell_config("sleep 10", None), fast_profiles(10_000, 20_000));
        let (ctx, cancel, _events) = ExecContext::detached();

        let handle = {
            let t = task("long work");
            tokio::spawn(async move { adapter.execute(&t, &ctx).await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.send(true).unwrap();

        let result = handle.await.unwrap();
        assert_eq!(result.terminated_by, Some(TerminatedBy::Cancelled));
        assert_eq!(result.status, ExecStatus::Error);
    }

    #[tokio::test]
    async fn test_progress_events_flow_to_subscriber() {
        let script = r#"echo plain line
echo 'PROGRESS: {"tool":"write","file":"a.rs"}'"#;
        let adapter = ExecutorAdapter::new(shell_config(script, None), fast_profiles(5_000, 20_000));
        let (ctx, _cancel, mut events) = ExecContext::detached();

        let result = adapter.execute(&task("emit progress"), &ctx).await;
        assert_eq!(result.status, ExecStatus::Complete);

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event);
        }
        assert!(kinds.iter().any(|e| matches!(e.kind, queuestore::ProgressKind::LogChunk { .. })));
        assert!(kinds
            .iter()
            .any(|e| matches!(e.kind, queuestore::ProgressKind::ToolProgress { .. })));
        assert!(kinds.iter().all(|e| e.task_id == "t1" && e.session_id == "s1"));
    }

    #[tokio::test]
    async fn test_blocked_report_carries_reason() {
        let script = r#"echo '{"status":"BLOCKED","blocked_reason":"this would drop the production table"}'"#;
        let adapter = ExecutorAdapter::new(shell_config(script, None), fast_profiles(5_000, 20_000));
        let (ctx, _cancel, _events) = ExecContext::detached();

        let result = adapter.execute(&task("drop table"), &ctx).await;

        assert_eq!(result.status, ExecStatus::Blocked);
        assert_eq!(
            result.blocked_reason.as_deref(),
            Some("this would drop the production table")
        );
    }

    #[tokio::test]
    async fn test_question_report_becomes_awaiting() {
        let script = r#"echo '{"question":"Which branch should I target?"}'"#;
        let adapter = ExecutorAdapter::new(shell_config(script, None), fast_profiles(5_000, 20_000));
        let (ctx, _cancel, _events) = ExecContext::detached();

        let result = adapter.execute(&task("ambiguous"), &ctx).await;

        assert_eq!(result.status, ExecStatus::AwaitingResponse);
        assert_eq!(result.output, "Which branch should I target?");
    }
}
