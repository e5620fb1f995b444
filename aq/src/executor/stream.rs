//! Executor output streaming
//!
//! Every stdout/stderr chunk is tagged with the (taskId, sessionId) of the
//! run that produced it, pushed into a bounded ring buffer, and fanned out
//! to broadcast subscribers. Before a transcript is assembled, a stale
//! filter drops anything that does not provably belong to the current run:
//! wrong task, wrong session, predates the task, matches a known stale
//! notification, or carries no identity at all (fail-closed).

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use queuestore::now_ms;

/// Substrings of notifications known to leak from terminated runs
pub const STALE_MARKERS: &[&str] = &[
    "session has been superseded",
    "previous session expired",
    "output from an earlier run",
    "task was aborted, discarding output",
];

/// Which standard stream a chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StdStream {
    Stdout,
    Stderr,
}

/// One tagged chunk of executor output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputChunk {
    pub task_id: Option<String>,
    pub session_id: Option<String>,
    pub stream: StdStream,
    pub content: String,
    pub timestamp: i64,
}

impl OutputChunk {
    pub fn new(
        task_id: impl Into<String>,
        session_id: impl Into<String>,
        stream: StdStream,
        content: impl Into<String>,
    ) -> Self {
        Self {
            task_id: Some(task_id.into()),
            session_id: Some(session_id.into()),
            stream,
            content: content.into(),
            timestamp: now_ms(),
        }
    }
}

/// Decide whether a buffered chunk is stale relative to the current run.
/// No-context chunks (neither id known) are stale by definition.
pub fn is_stale(chunk: &OutputChunk, task_id: &str, session_id: &str, task_created_at: i64) -> bool {
    match (&chunk.task_id, &chunk.session_id) {
        (None, None) => return true,
        (Some(t), _) if t != task_id => return true,
        (_, Some(s)) if s != session_id => return true,
        _ => {}
    }

    if chunk.timestamp < task_created_at {
        return true;
    }

    let lowered = chunk.content.to_lowercase();
    STALE_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Bounded, drop-oldest chunk buffer. Single writer (the adapter), read
/// as a snapshot when the run ends.
#[derive(Debug)]
pub struct OutputRing {
    capacity: usize,
    buf: VecDeque<OutputChunk>,
    dropped: u64,
}

impl OutputRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buf: VecDeque::with_capacity(capacity.min(1024)),
            dropped: 0,
        }
    }

    /// Append a chunk, evicting the oldest when full
    pub fn push(&mut self, chunk: OutputChunk) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
            self.dropped += 1;
        }
        self.buf.push_back(chunk);
    }

    /// Chunks currently buffered, oldest first
    pub fn snapshot(&self) -> Vec<OutputChunk> {
        self.buf.iter().cloned().collect()
    }

    /// How many chunks were evicted to make room
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(task: Option<&str>, session: Option<&str>, content: &str) -> OutputChunk {
        OutputChunk {
            task_id: task.map(String::from),
            session_id: session.map(String::from),
            stream: StdStream::Stdout,
            content: content.to_string(),
            timestamp: now_ms(),
        }
    }

    #[test]
    fn test_matching_chunk_is_fresh() {
        let c = chunk(Some("t1"), Some("s1"), "working on it");
        assert!(!is_stale(&c, "t1", "s1", 0));
    }

    #[test]
    fn test_wrong_task_is_stale() {
        let c = chunk(Some("t2"), Some("s1"), "hello");
        assert!(is_stale(&c, "t1", "s1", 0));
    }

    #[test]
    fn test_wrong_session_is_stale() {
        let c = chunk(Some("t1"), Some("s2"), "hello");
        assert!(is_stale(&c, "t1", "s1", 0));
    }

    #[test]
    fn test_no_context_is_stale_fail_closed() {
        let c = chunk(None, None, "orphan output");
        assert!(is_stale(&c, "t1", "s1", 0));
    }

    #[test]
    fn test_partial_context_matching_is_fresh() {
        // task id known and matching, session unknown: accepted
        let c = chunk(Some("t1"), None, "hello");
        assert!(!is_stale(&c, "t1", "s1", 0));
    }

    #[test]
    fn test_predating_chunk_is_stale() {
        let mut c = chunk(Some("t1"), Some("s1"), "old");
        c.timestamp = 1_000;
        assert!(is_stale(&c, "t1", "s1", 2_000));
    }

    #[test]
    fn test_stale_notification_content() {
        let c = chunk(Some("t1"), Some("s1"), "NOTE: Previous Session Expired, ignore");
        assert!(is_stale(&c, "t1", "s1", 0));
    }

    #[test]
    fn test_ring_drops_oldest() {
        let mut ring = OutputRing::new(3);
        for i in 0..5 {
            ring.push(chunk(Some("t1"), Some("s1"), &format!("line {}", i)));
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.dropped(), 2);
        let contents: Vec<_> = ring.snapshot().into_iter().map(|c| c.content).collect();
        assert_eq!(contents, vec!["line 2", "line 3", "line 4"]);
    }
}
