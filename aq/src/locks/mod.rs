//! In-memory lock registry and executor semaphore
//!
//! One instance per scheduler, passed explicitly to the components that
//! need it. READ locks are compatible with each other, WRITE locks are
//! exclusive. Multi-path acquisition sorts paths into a canonical order
//! and rolls back in reverse on any failure, so two executors requesting
//! overlapping sets cannot deadlock through ordering alone; for the
//! remaining cases `detect_deadlock` runs a cycle search over a wait-for
//! graph. Expiry timestamps on locks are informational only - nothing in
//! this module releases a lock because its deadline passed.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use queuestore::now_ms;

/// Lock compatibility class
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockType {
    Read,
    Write,
}

/// One held file lock
#[derive(Debug, Clone)]
pub struct FileLock {
    pub lock_id: String,
    pub file_path: PathBuf,
    pub holder: String,
    pub lock_type: LockType,
    pub acquired_at: i64,
    /// Informational only; never drives release
    pub expires_at: i64,
}

/// Lock manager errors; all non-fatal to the process
#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock acquisition failed for {path}: conflicting lock held by {holder}")]
    AcquisitionFailed { path: PathBuf, holder: String },

    #[error("releasing a lock because its expiry passed is forbidden")]
    ReleaseForbidden,

    #[error("deadlock detected involving executor {0}")]
    DeadlockDetected(String),

    #[error("executor limit exceeded: {limit} already in flight")]
    ExecutorLimitExceeded { limit: usize },

    #[error("unknown lock id: {0}")]
    UnknownLock(String),

    #[error("executor {0} already holds a permit")]
    PermitAlreadyHeld(String),
}

/// Wait-for graph: an edge A -> B means executor A waits on a lock held by B
#[derive(Debug, Default, Clone)]
pub struct WaitGraph {
    edges: HashMap<String, Vec<String>>,
}

impl WaitGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `waiter` waits on `holder`
    pub fn add_wait(&mut self, waiter: impl Into<String>, holder: impl Into<String>) {
        self.edges.entry(waiter.into()).or_default().push(holder.into());
    }

    fn neighbours(&self, node: &str) -> &[String] {
        self.edges.get(node).map(|v| v.as_slice()).unwrap_or(&[])
    }

    fn nodes(&self) -> impl Iterator<Item = &String> {
        self.edges.keys()
    }
}

#[derive(Default)]
struct LockInner {
    locks: HashMap<String, FileLock>,
    by_path: HashMap<PathBuf, Vec<String>>,
    permits: HashSet<String>,
}

/// Per-scheduler lock registry plus the global executor semaphore
pub struct LockManager {
    inner: Mutex<LockInner>,
    max_executors: usize,
    default_ttl_ms: i64,
}

impl LockManager {
    /// Create a manager permitting at most `max_executors` concurrent runs
    pub fn new(max_executors: usize) -> Self {
        Self {
            inner: Mutex::new(LockInner::default()),
            max_executors,
            default_ttl_ms: 600_000,
        }
    }

    /// Acquire one lock on `path` for `holder`
    pub async fn acquire(
        &self,
        path: impl AsRef<Path>,
        holder: &str,
        lock_type: LockType,
    ) -> Result<FileLock, LockError> {
        let mut inner = self.inner.lock().await;
        self.acquire_locked(&mut inner, path.as_ref(), holder, lock_type)
    }

    /// Acquire locks on several paths. Paths are sorted into a canonical
    /// order before acquisition; on any failure every lock taken so far is
    /// released in reverse order and the error is returned.
    pub async fn acquire_many(
        &self,
        paths: &[PathBuf],
        holder: &str,
        lock_type: LockType,
    ) -> Result<Vec<FileLock>, LockError> {
        let mut sorted: Vec<PathBuf> = paths.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut inner = self.inner.lock().await;
        let mut acquired: Vec<FileLock> = Vec::with_capacity(sorted.len());

        for path in &sorted {
            match self.acquire_locked(&mut inner, path, holder, lock_type) {
                Ok(lock) => acquired.push(lock),
                Err(e) => {
                    for lock in acquired.iter().rev() {
                        Self::release_locked(&mut inner, &lock.lock_id);
                    }
                    return Err(e);
                }
            }
        }

        Ok(acquired)
    }

    /// Release a held lock by id
    pub async fn release(&self, lock_id: &str) -> Result<(), LockError> {
        let mut inner = self.inner.lock().await;
        if !inner.locks.contains_key(lock_id) {
            return Err(LockError::UnknownLock(lock_id.to_string()));
        }
        Self::release_locked(&mut inner, lock_id);
        Ok(())
    }

    /// Release every lock held by one executor (exit-path cleanup)
    pub async fn release_all_for(&self, holder: &str) -> usize {
        let mut inner = self.inner.lock().await;
        let ids: Vec<String> = inner
            .locks
            .values()
            .filter(|l| l.holder == holder)
            .map(|l| l.lock_id.clone())
            .collect();
        for id in &ids {
            Self::release_locked(&mut inner, id);
        }
        ids.len()
    }

    /// Expiry-driven release is forbidden by contract: this always fails,
    /// regardless of how stale the lock looks.
    pub async fn release_expired(&self) -> Result<usize, LockError> {
        Err(LockError::ReleaseForbidden)
    }

    /// Take one executor permit. Fails immediately when the limit is
    /// reached - the poller backs off instead of blocking here.
    pub async fn acquire_semaphore(&self, executor_id: &str) -> Result<(), LockError> {
        let mut inner = self.inner.lock().await;
        if inner.permits.contains(executor_id) {
            return Err(LockError::PermitAlreadyHeld(executor_id.to_string()));
        }
        if inner.permits.len() >= self.max_executors {
            return Err(LockError::ExecutorLimitExceeded {
                limit: self.max_executors,
            });
        }
        inner.permits.insert(executor_id.to_string());
        debug!(executor_id, in_flight = inner.permits.len(), "Semaphore acquired");
        Ok(())
    }

    /// Return a permit; true when the executor actually held one
    pub async fn release_semaphore(&self, executor_id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let released = inner.permits.remove(executor_id);
        if released {
            debug!(executor_id, in_flight = inner.permits.len(), "Semaphore released");
        }
        released
    }

    /// Number of permits currently out
    pub async fn in_flight(&self) -> usize {
        self.inner.lock().await.permits.len()
    }

    /// Locks currently held (snapshot)
    pub async fn held_locks(&self) -> Vec<FileLock> {
        self.inner.lock().await.locks.values().cloned().collect()
    }

    /// Depth-first cycle search over the wait-for graph; returns true on
    /// the first back edge encountered.
    pub fn detect_deadlock(graph: &WaitGraph) -> bool {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut on_stack: HashSet<&str> = HashSet::new();

        fn dfs<'a>(
            graph: &'a WaitGraph,
            node: &'a str,
            visited: &mut HashSet<&'a str>,
            on_stack: &mut HashSet<&'a str>,
        ) -> bool {
            visited.insert(node);
            on_stack.insert(node);
            for next in graph.neighbours(node) {
                if on_stack.contains(next.as_str()) {
                    return true;
                }
                if !visited.contains(next.as_str()) && dfs(graph, next, visited, on_stack) {
                    return true;
                }
            }
            on_stack.remove(node);
            false
        }

        for node in graph.nodes() {
            if !visited.contains(node.as_str()) && dfs(graph, node, &mut visited, &mut on_stack) {
                return true;
            }
        }
        false
    }

    fn acquire_locked(
        &self,
        inner: &mut LockInner,
        path: &Path,
        holder: &str,
        lock_type: LockType,
    ) -> Result<FileLock, LockError> {
        if let Some(ids) = inner.by_path.get(path) {
            for id in ids {
                let existing = &inner.locks[id];
                let compatible =
                    existing.lock_type == LockType::Read && lock_type == LockType::Read;
                if !compatible {
                    return Err(LockError::AcquisitionFailed {
                        path: path.to_path_buf(),
                        holder: existing.holder.clone(),
                    });
                }
            }
        }

        let now = now_ms();
        let lock = FileLock {
            lock_id: queuestore::generate_id("lock", &path.to_string_lossy()),
            file_path: path.to_path_buf(),
            holder: holder.to_string(),
            lock_type,
            acquired_at: now,
            expires_at: now + self.default_ttl_ms,
        };
        inner
            .by_path
            .entry(path.to_path_buf())
            .or_default()
            .push(lock.lock_id.clone());
        inner.locks.insert(lock.lock_id.clone(), lock.clone());
        debug!(path = %path.display(), holder, ?lock_type, "Lock acquired");
        Ok(lock)
    }

    fn release_locked(inner: &mut LockInner, lock_id: &str) {
        if let Some(lock) = inner.locks.remove(lock_id) {
            if let Some(ids) = inner.by_path.get_mut(&lock.file_path) {
                ids.retain(|id| id != lock_id);
                if ids.is_empty() {
                    inner.by_path.remove(&lock.file_path);
                }
            }
        }
    }
}
