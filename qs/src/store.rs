//! File-backed queue store
//!
//! One JSON file per task and per group, JSONL event logs, write-to-temp +
//! rename for every record update. A single async mutex serializes the
//! mutating paths so two concurrent claimers can never take the same task.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::event::ProgressEvent;
use crate::group::{ConversationEntry, GroupState, Role, TaskGroup};
use crate::task::{StatusPatch, TaskRecord, TaskStatus, TaskType};
use crate::{is_valid_namespace, now_ms};

/// Parameters for creating a task
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub session_id: String,
    pub task_group_id: String,
    pub prompt: String,
    pub task_type: TaskType,
    pub namespace: String,
}

/// Durable mapping task-id -> task record, namespace scoped
pub struct QueueStore {
    root: PathBuf,
    /// Serializes claim and every read-modify-write path
    write_lock: Mutex<()>,
    /// Held for the store's lifetime; guards against a second writer process
    _dir_lock: fs::File,
}

impl QueueStore {
    /// Open (or create) a store rooted at `state_dir`
    pub fn open(state_dir: impl AsRef<Path>) -> StoreResult<Self> {
        let root = state_dir.as_ref().to_path_buf();
        fs::create_dir_all(root.join("queue"))?;

        let lock_path = root.join(".queuestore.lock");
        let dir_lock = fs::File::create(&lock_path)?;
        dir_lock.try_lock_exclusive()?;

        info!(root = %root.display(), "Queue store opened");
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
            _dir_lock: dir_lock,
        })
    }

    /// The state directory this store persists into
    pub fn root(&self) -> &Path {
        &self.root
    }

    // === Paths ===

    fn tasks_dir(&self, namespace: &str) -> PathBuf {
        self.root.join("queue").join(namespace).join("tasks")
    }

    fn groups_dir(&self, namespace: &str) -> PathBuf {
        self.root.join("queue").join(namespace).join("groups")
    }

    fn events_dir(&self, namespace: &str) -> PathBuf {
        self.root.join("queue").join(namespace).join("events")
    }

    fn task_path(&self, namespace: &str, task_id: &str) -> PathBuf {
        self.tasks_dir(namespace).join(format!("{}.json", task_id))
    }

    fn group_path(&self, namespace: &str, group_id: &str) -> PathBuf {
        self.groups_dir(namespace).join(format!("{}.json", group_id))
    }

    fn events_path(&self, namespace: &str, task_id: &str) -> PathBuf {
        self.events_dir(namespace).join(format!("{}.jsonl", task_id))
    }

    // === Task operations ===

    /// Create a QUEUED task and thread its prompt into the group history
    pub async fn enqueue(&self, req: EnqueueRequest) -> StoreResult<TaskRecord> {
        if req.prompt.trim().is_empty() {
            return Err(StoreError::InvalidInput("prompt must be non-empty".to_string()));
        }
        if req.task_group_id.trim().is_empty() {
            return Err(StoreError::InvalidInput("task_group_id must be non-empty".to_string()));
        }
        if !is_valid_namespace(&req.namespace) {
            return Err(StoreError::InvalidInput(format!(
                "namespace must match [a-z0-9-]+, got {:?}",
                req.namespace
            )));
        }

        let record = TaskRecord::new(
            &req.session_id,
            &req.task_group_id,
            &req.prompt,
            req.task_type,
            &req.namespace,
        );

        let _guard = self.write_lock.lock().await;

        let mut group = self
            .read_group(&req.namespace, &req.task_group_id)?
            .unwrap_or_else(|| TaskGroup::new(&req.task_group_id, &req.session_id, &req.namespace));
        group.append_entry(ConversationEntry::new(Role::User, &req.prompt, Some(record.id.clone())));
        group.set_state(GroupState::Active);

        self.write_json(&self.task_path(&req.namespace, &record.id), &record)?;
        self.write_json(&self.group_path(&req.namespace, &req.task_group_id), &group)?;

        debug!(task_id = %record.id, namespace = %req.namespace, "Enqueued task");
        Ok(record)
    }

    /// Fetch a task by id; scans every namespace when none is given
    pub fn get(&self, task_id: &str, namespace: Option<&str>) -> StoreResult<Option<TaskRecord>> {
        match namespace {
            Some(ns) => self.read_json(&self.task_path(ns, task_id)),
            None => Ok(self.find_task(task_id)?.map(|(_, record)| record)),
        }
    }

    /// Locate a task across namespaces
    pub fn find_task(&self, task_id: &str) -> StoreResult<Option<(String, TaskRecord)>> {
        for ns in self.list_namespaces()? {
            if let Some(record) = self.read_json::<TaskRecord>(&self.task_path(&ns, task_id))? {
                return Ok(Some((ns, record)));
            }
        }
        Ok(None)
    }

    /// All tasks in a namespace, oldest first (ties broken by id)
    pub fn list_tasks(&self, namespace: &str) -> StoreResult<Vec<TaskRecord>> {
        let mut tasks: Vec<TaskRecord> = self.read_all(&self.tasks_dir(namespace))?;
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tasks)
    }

    /// Tasks belonging to one group, oldest first
    pub fn list_by_group(&self, group_id: &str, namespace: &str) -> StoreResult<Vec<TaskRecord>> {
        let mut tasks = self.list_tasks(namespace)?;
        tasks.retain(|t| t.task_group_id == group_id);
        Ok(tasks)
    }

    /// All groups in a namespace, oldest first
    pub fn list_groups(&self, namespace: &str) -> StoreResult<Vec<TaskGroup>> {
        let mut groups: Vec<TaskGroup> = self.read_all(&self.groups_dir(namespace))?;
        groups.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.task_group_id.cmp(&b.task_group_id))
        });
        Ok(groups)
    }

    /// Fetch one group
    pub fn get_group(&self, namespace: &str, group_id: &str) -> StoreResult<Option<TaskGroup>> {
        self.read_group(namespace, group_id)
    }

    /// Every namespace with persisted state
    pub fn list_namespaces(&self) -> StoreResult<Vec<String>> {
        let queue_dir = self.root.join("queue");
        let mut namespaces = Vec::new();
        if queue_dir.exists() {
            for entry in fs::read_dir(&queue_dir)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    namespaces.push(entry.file_name().to_string_lossy().to_string());
                }
            }
        }
        namespaces.sort();
        Ok(namespaces)
    }

    /// Atomically take the oldest QUEUED task and flip it to RUNNING.
    /// Returns `None` when nothing is claimable.
    pub async fn claim(&self, namespace: &str) -> StoreResult<Option<TaskRecord>> {
        let _guard = self.write_lock.lock().await;

        let candidate = self
            .list_tasks(namespace)?
            .into_iter()
            .find(|t| t.status == TaskStatus::Queued);

        let Some(mut record) = candidate else {
            return Ok(None);
        };

        if !record.status.can_transition_to(TaskStatus::Running) {
            return Err(StoreError::InvalidTransition {
                from: record.status,
                to: TaskStatus::Running,
            });
        }
        record.status = TaskStatus::Running;
        record.updated_at = now_ms();
        self.write_json(&self.task_path(namespace, &record.id), &record)?;

        debug!(task_id = %record.id, "Claimed task");
        Ok(Some(record))
    }

    /// Validate and persist a status transition
    pub async fn update_status(&self, namespace: &str, task_id: &str, patch: StatusPatch) -> StoreResult<TaskRecord> {
        let _guard = self.write_lock.lock().await;

        let mut record = self
            .read_json::<TaskRecord>(&self.task_path(namespace, task_id))?
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;
        record.apply_patch(&patch)?;
        self.write_json(&self.task_path(namespace, task_id), &record)?;

        debug!(task_id, status = %record.status, "Updated task status");
        Ok(record)
    }

    /// Resume an AWAITING_RESPONSE task with a user reply. The clarification
    /// question stays in the conversation history but is cleared from the
    /// record's output so it is not re-asked.
    pub async fn resume_with_response(
        &self,
        namespace: &str,
        task_id: &str,
        reply: &str,
    ) -> StoreResult<TaskRecord> {
        if reply.trim().is_empty() {
            return Err(StoreError::InvalidInput("reply must be non-empty".to_string()));
        }

        let _guard = self.write_lock.lock().await;

        let mut record = self
            .read_json::<TaskRecord>(&self.task_path(namespace, task_id))?
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;

        if record.status != TaskStatus::AwaitingResponse {
            return Err(StoreError::InvalidTransition {
                from: record.status,
                to: TaskStatus::Queued,
            });
        }

        record.user_reply = Some(reply.to_string());
        record.output = None;
        record.status = TaskStatus::Queued;
        record.updated_at = now_ms();
        self.write_json(&self.task_path(namespace, task_id), &record)?;

        if let Some(mut group) = self.read_group(namespace, &record.task_group_id)? {
            group.append_entry(ConversationEntry::new(Role::User, reply, Some(task_id.to_string())));
            group.set_state(GroupState::Active);
            self.write_json(&self.group_path(namespace, &record.task_group_id), &group)?;
        }

        info!(task_id, "Task resumed with user reply");
        Ok(record)
    }

    /// Append one progress event and freshen the task's updated_at so the
    /// stale scan sees the run as alive
    pub async fn append_event(&self, namespace: &str, event: &ProgressEvent) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;

        let path = self.events_path(namespace, &event.task_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::OpenOptions::new().create(true).append(true).open(&path)?;
        let line = serde_json::to_string(event)?;
        writeln!(file, "{}", line)?;

        if let Some(mut record) = self.read_json::<TaskRecord>(&self.task_path(namespace, &event.task_id))? {
            record.updated_at = now_ms();
            self.write_json(&self.task_path(namespace, &event.task_id), &record)?;
        }

        Ok(())
    }

    /// Read the full event log for a task, in emission order
    pub fn read_events(&self, namespace: &str, task_id: &str) -> StoreResult<Vec<ProgressEvent>> {
        let path = self.events_path(namespace, task_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path)?;
        let mut events = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str(line) {
                Ok(event) => events.push(event),
                Err(e) => warn!(task_id, error = %e, "Skipping corrupt event line"),
            }
        }
        Ok(events)
    }

    /// RUNNING tasks whose updated_at is older than `max_age_ms`
    pub fn list_stale_running(&self, namespace: &str, max_age_ms: i64) -> StoreResult<Vec<TaskRecord>> {
        let cutoff = now_ms() - max_age_ms;
        let mut stale = self.list_tasks(namespace)?;
        stale.retain(|t| t.status == TaskStatus::Running && t.updated_at <= cutoff);
        Ok(stale)
    }

    /// Rollback-replay: RUNNING -> QUEUED with attempt_count += 1
    pub async fn rollback_replay(&self, namespace: &str, task_id: &str) -> StoreResult<TaskRecord> {
        self.update_status(namespace, task_id, StatusPatch::Requeue).await
    }

    // === Group operations ===

    /// Append an entry to a group's conversation history
    pub async fn append_group_entry(
        &self,
        namespace: &str,
        group_id: &str,
        entry: ConversationEntry,
    ) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut group = self
            .read_group(namespace, group_id)?
            .ok_or_else(|| StoreError::NotFound(format!("group {}", group_id)))?;
        group.append_entry(entry);
        self.write_json(&self.group_path(namespace, group_id), &group)
    }

    /// Set a group's state (user-action driven)
    pub async fn set_group_state(&self, namespace: &str, group_id: &str, state: GroupState) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut group = self
            .read_group(namespace, group_id)?
            .ok_or_else(|| StoreError::NotFound(format!("group {}", group_id)))?;
        group.set_state(state);
        self.write_json(&self.group_path(namespace, group_id), &group)
    }

    // === Persistence helpers ===

    fn read_group(&self, namespace: &str, group_id: &str) -> StoreResult<Option<TaskGroup>> {
        self.read_json(&self.group_path(namespace, group_id))
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Path) -> StoreResult<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn read_all<T: DeserializeOwned>(&self, dir: &Path) -> StoreResult<Vec<T>> {
        let mut records = Vec::new();
        if !dir.exists() {
            return Ok(records);
        }
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                match fs::read_to_string(&path).map_err(StoreError::from).and_then(|content| {
                    serde_json::from_str::<T>(&content).map_err(StoreError::from)
                }) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable record"),
                }
            }
        }
        Ok(records)
    }

    /// Write-to-temp + rename; a failed write is retried once before the
    /// error propagates to the caller
    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> StoreResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(value)?;
        let tmp = path.with_extension("json.tmp");

        let attempt = |tmp: &Path, path: &Path, data: &[u8]| -> std::io::Result<()> {
            fs::write(tmp, data)?;
            fs::rename(tmp, path)
        };

        if let Err(first) = attempt(&tmp, path, &data) {
            warn!(path = %path.display(), error = %first, "Record write failed, retrying once");
            attempt(&tmp, path, &data)?;
        }
        Ok(())
    }
}
