//! Runner liveness registry
//!
//! Each scheduler loop beats its own entry; the control plane reports a
//! runner alive while its newest heartbeat is within the alive window.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;

use queuestore::now_ms;

/// Snapshot of one runner for the control plane
#[derive(Debug, Clone, Serialize)]
pub struct RunnerStatus {
    pub runner_id: String,
    pub namespace: String,
    pub last_heartbeat: i64,
    pub is_alive: bool,
    pub status: String,
}

/// Shared registry of scheduler heartbeats
pub struct RunnerRegistry {
    inner: Mutex<HashMap<String, (String, i64)>>,
    alive_window_ms: i64,
}

impl RunnerRegistry {
    pub fn new(alive_window_ms: i64) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            alive_window_ms,
        }
    }

    /// Record a heartbeat for one runner
    pub fn beat(&self, runner_id: &str, namespace: &str) {
        self.inner
            .lock()
            .unwrap()
            .insert(runner_id.to_string(), (namespace.to_string(), now_ms()));
    }

    /// All known runners, optionally filtered by namespace
    pub fn snapshot(&self, namespace: Option<&str>) -> Vec<RunnerStatus> {
        let now = now_ms();
        let mut runners: Vec<RunnerStatus> = self
            .inner
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, (ns, _))| namespace.is_none_or(|want| ns.as_str() == want))
            .map(|(id, (ns, last))| {
                let is_alive = now - last < self.alive_window_ms;
                RunnerStatus {
                    runner_id: id.clone(),
                    namespace: ns.clone(),
                    last_heartbeat: *last,
                    is_alive,
                    status: if is_alive { "alive" } else { "dead" }.to_string(),
                }
            })
            .collect();
        runners.sort_by(|a, b| a.runner_id.cmp(&b.runner_id));
        runners
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_beat_is_alive() {
        let registry = RunnerRegistry::new(120_000);
        registry.beat("runner-1", "ns");

        let snapshot = registry.snapshot(None);
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].is_alive);
        assert_eq!(snapshot[0].status, "alive");
    }

    #[test]
    fn test_stale_beat_is_dead() {
        let registry = RunnerRegistry::new(0);
        registry.beat("runner-1", "ns");
        std::thread::sleep(std::time::Duration::from_millis(2));

        let snapshot = registry.snapshot(None);
        assert!(!snapshot[0].is_alive);
        assert_eq!(snapshot[0].status, "dead");
    }

    #[test]
    fn test_namespace_filter() {
        let registry = RunnerRegistry::new(120_000);
        registry.beat("runner-1", "ns-a");
        registry.beat("runner-2", "ns-b");

        let filtered = registry.snapshot(Some("ns-a"));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].runner_id, "runner-1");
        assert_eq!(registry.snapshot(None).len(), 2);
    }
}
