//! Executor result types

use serde::{Deserialize, Serialize};

/// Outcome classification of one executor run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecStatus {
    Complete,
    Error,
    Blocked,
    Incomplete,
    AwaitingResponse,
    /// The executor claimed success but produced nothing verifiable
    NoEvidence,
}

/// What ended the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminatedBy {
    ProcessExit,
    HardTimeout,
    IdleTimeout,
    Cancelled,
    PreflightFailClosed,
}

/// A file re-stated from the filesystem after execution ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedFile {
    pub path: String,
    pub exists: bool,
    pub size: u64,
}

/// Head of a verified file's content, scanned by the review criteria
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilePreview {
    pub path: String,
    pub head: String,
}

/// The product of one executor run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorResult {
    /// False when the child never ran (preflight/spawn failure)
    pub executed: bool,

    /// The streamed transcript, stale chunks filtered out
    pub output: String,

    /// Files the executor claims to have modified
    pub files_modified: Vec<String>,

    /// Subset of files_modified confirmed on disk after the run
    pub verified_files: Vec<VerifiedFile>,

    /// files_modified minus the verified set
    pub unverified_files: Vec<String>,

    /// Content heads of verified files, for the quality gates
    pub file_previews: Vec<FilePreview>,

    pub duration_ms: u64,
    pub status: ExecStatus,
    pub error: Option<String>,
    pub blocked_reason: Option<String>,
    pub terminated_by: Option<TerminatedBy>,
}

impl ExecutorResult {
    /// A run that never produced anything
    pub fn empty(status: ExecStatus) -> Self {
        Self {
            executed: false,
            output: String::new(),
            files_modified: Vec::new(),
            verified_files: Vec::new(),
            unverified_files: Vec::new(),
            file_previews: Vec::new(),
            duration_ms: 0,
            status,
            error: None,
            blocked_reason: None,
            terminated_by: None,
        }
    }

    /// An error result with a machine-readable message
    pub fn error(message: impl Into<String>) -> Self {
        let mut result = Self::empty(ExecStatus::Error);
        result.error = Some(message.into());
        result
    }

    /// A successful result (test and aggregation helper)
    pub fn complete(output: impl Into<String>) -> Self {
        let mut result = Self::empty(ExecStatus::Complete);
        result.executed = true;
        result.output = output.into();
        result
    }

    /// Attach a verified file (test and aggregation helper)
    pub fn with_verified_file(mut self, path: impl Into<String>, size: u64) -> Self {
        let path = path.into();
        if !self.files_modified.contains(&path) {
            self.files_modified.push(path.clone());
        }
        self.verified_files.push(VerifiedFile {
            path,
            exists: true,
            size,
        });
        self
    }

    /// True when the run ended on a timeout
    pub fn timed_out(&self) -> bool {
        matches!(
            self.terminated_by,
            Some(TerminatedBy::HardTimeout) | Some(TerminatedBy::IdleTimeout)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_result() {
        let r = ExecutorResult::error("AUTH_ERROR: credential missing");
        assert_eq!(r.status, ExecStatus::Error);
        assert!(!r.executed);
        assert!(r.error.as_deref().unwrap().starts_with("AUTH_ERROR"));
    }

    #[test]
    fn test_with_verified_file() {
        let r = ExecutorResult::complete("done").with_verified_file("hello.txt", 6);
        assert_eq!(r.files_modified, vec!["hello.txt"]);
        assert_eq!(r.verified_files.len(), 1);
        assert!(r.verified_files[0].exists);
    }

    #[test]
    fn test_timed_out() {
        let mut r = ExecutorResult::error("timeout");
        assert!(!r.timed_out());
        r.terminated_by = Some(TerminatedBy::HardTimeout);
        assert!(r.timed_out());
        r.terminated_by = Some(TerminatedBy::ProcessExit);
        assert!(!r.timed_out());
    }

    #[test]
    fn test_status_wire_names() {
        let json = serde_json::to_string(&ExecStatus::NoEvidence).unwrap();
        assert_eq!(json, "\"NO_EVIDENCE\"");
        let json = serde_json::to_string(&TerminatedBy::PreflightFailClosed).unwrap();
        assert_eq!(json, "\"PREFLIGHT_FAIL_CLOSED\"");
    }
}
