//! Review trace persistence
//!
//! Review-loop events are appended to per-task JSONL files under
//! `<stateDir>/trace/<task-id>/<timestamp>.jsonl`, one file per loop run.
//! The trace endpoint reads them back for inspection.

use std::fs;
use std::io::Write as _;
use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;

use queuestore::now_ms;

/// One persisted review run
#[derive(Debug, Clone, Serialize)]
pub struct TraceRun {
    /// File stem, the loop-start timestamp
    pub name: String,
    pub entries: Vec<Value>,
}

/// Aggregate view over a task's trace
#[derive(Debug, Clone, Serialize)]
pub struct TraceSummary {
    pub runs: usize,
    pub entries: usize,
    /// QUALITY_JUDGMENT values in order of appearance
    pub judgments: Vec<String>,
}

/// Writes and reads per-task review traces
pub struct TraceWriter {
    root: PathBuf,
}

impl TraceWriter {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: state_dir.into().join("trace"),
        }
    }

    /// Start a new trace file for one review-loop run
    pub fn begin(&self, task_id: &str) -> std::io::Result<TraceHandle> {
        let dir = self.root.join(task_id);
        fs::create_dir_all(&dir)?;
        Ok(TraceHandle {
            path: dir.join(format!("{}.jsonl", now_ms())),
        })
    }

    /// Whether any trace exists for the task
    pub fn exists(&self, task_id: &str) -> bool {
        self.root.join(task_id).is_dir()
    }

    /// Read all runs for a task, oldest first. With `latest`, only the
    /// newest run is returned.
    pub fn read(&self, task_id: &str, latest: bool) -> std::io::Result<Vec<TraceRun>> {
        let dir = self.root.join(task_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut names: Vec<String> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                name.strip_suffix(".jsonl").map(String::from)
            })
            .collect();
        names.sort();
        if latest && names.len() > 1 {
            names = names.split_off(names.len() - 1);
        }

        let mut runs = Vec::with_capacity(names.len());
        for name in names {
            let content = fs::read_to_string(dir.join(format!("{}.jsonl", name)))?;
            let entries = content
                .lines()
                .filter(|l| !l.trim().is_empty())
                .filter_map(|l| serde_json::from_str(l).ok())
                .collect();
            runs.push(TraceRun { name, entries });
        }
        Ok(runs)
    }

    /// Summarize the judgments recorded across runs
    pub fn summarize(runs: &[TraceRun]) -> TraceSummary {
        let mut judgments = Vec::new();
        let mut entries = 0;
        for run in runs {
            entries += run.entries.len();
            for entry in &run.entries {
                if entry.get("event").and_then(Value::as_str) == Some("QUALITY_JUDGMENT") {
                    if let Some(j) = entry.get("judgment").and_then(Value::as_str) {
                        judgments.push(j.to_string());
                    }
                }
            }
        }
        TraceSummary {
            runs: runs.len(),
            entries,
            judgments,
        }
    }
}

/// Appender for one review-loop run
pub struct TraceHandle {
    path: PathBuf,
}

impl TraceHandle {
    /// Append one event, stamped with the write time
    pub fn append<T: Serialize>(&self, event: &T) -> std::io::Result<()> {
        let mut value = serde_json::to_value(event).map_err(std::io::Error::other)?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("timestamp".to_string(), Value::from(now_ms()));
        }
        let mut file = fs::OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", value)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[derive(Serialize)]
    struct FakeEvent {
        event: &'static str,
        judgment: &'static str,
    }

    #[test]
    fn test_append_and_read_back() {
        let temp = tempdir().unwrap();
        let writer = TraceWriter::new(temp.path());

        let handle = writer.begin("task-1").unwrap();
        handle
            .append(&FakeEvent {
                event: "QUALITY_JUDGMENT",
                judgment: "REJECT",
            })
            .unwrap();
        handle
            .append(&FakeEvent {
                event: "QUALITY_JUDGMENT",
                judgment: "PASS",
            })
            .unwrap();

        let runs = writer.read("task-1", false).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].entries.len(), 2);
        assert!(runs[0].entries[0]["timestamp"].as_i64().unwrap() > 0);

        let summary = TraceWriter::summarize(&runs);
        assert_eq!(summary.judgments, vec!["REJECT", "PASS"]);
        assert_eq!(summary.entries, 2);
    }

    #[test]
    fn test_latest_selects_newest_run() {
        let temp = tempdir().unwrap();
        let writer = TraceWriter::new(temp.path());

        let first = writer.begin("task-1").unwrap();
        first
            .append(&FakeEvent {
                event: "REVIEW_LOOP_START",
                judgment: "",
            })
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = writer.begin("task-1").unwrap();
        second
            .append(&FakeEvent {
                event: "REVIEW_LOOP_END",
                judgment: "",
            })
            .unwrap();

        assert_eq!(writer.read("task-1", false).unwrap().len(), 2);
        let latest = writer.read("task-1", true).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].entries[0]["event"], "REVIEW_LOOP_END");
    }

    #[test]
    fn test_missing_task_reads_empty() {
        let temp = tempdir().unwrap();
        let writer = TraceWriter::new(temp.path());
        assert!(writer.read("ghost", false).unwrap().is_empty());
        assert!(!writer.exists("ghost"));
    }
}
