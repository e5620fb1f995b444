//! Quality criteria Q1-Q6
//!
//! Structural gates on an executor result. Each criterion inspects the
//! transcript and the verified-file previews; none of them call back into
//! the executor.

use crate::executor::{ExecStatus, ExecutorResult};

/// Markers of unfinished work
const UNFINISHED_MARKERS: &[&str] = &["TODO", "FIXME", "TBD"];

/// Omission markers, including the Japanese ones executors habitually emit
const OMISSION_MARKERS: &[&str] = &["// 残り省略", "// etc.", "// 以下同様"];

/// Closing phrases that claim the work is finished
const CLOSING_PHRASES: &[&str] = &["完了しました", "以上です", "done", "all done", "task complete"];

/// The six quality criteria
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Criterion {
    /// Q1: every modified file was verified on disk
    FilesVerified,
    /// Q2: no TODO/FIXME/TBD markers remain
    NoUnfinishedMarkers,
    /// Q3: no omission markers or elided code blocks
    NoOmissionMarkers,
    /// Q4: fenced code blocks are syntactically closed
    BalancedCodeBlocks,
    /// Q5: there is evidence the work actually happened
    EvidencePresent,
    /// Q6: completion claims are backed by verified files
    NoEarlyTermination,
}

impl Criterion {
    pub const ALL: [Criterion; 6] = [
        Criterion::FilesVerified,
        Criterion::NoUnfinishedMarkers,
        Criterion::NoOmissionMarkers,
        Criterion::BalancedCodeBlocks,
        Criterion::EvidencePresent,
        Criterion::NoEarlyTermination,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Self::FilesVerified => "Q1",
            Self::NoUnfinishedMarkers => "Q2",
            Self::NoOmissionMarkers => "Q3",
            Self::BalancedCodeBlocks => "Q4",
            Self::EvidencePresent => "Q5",
            Self::NoEarlyTermination => "Q6",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::FilesVerified => "every modified file must be verified on disk",
            Self::NoUnfinishedMarkers => "no TODO, FIXME or TBD markers may remain",
            Self::NoOmissionMarkers => "no omission markers or elided code",
            Self::BalancedCodeBlocks => "code blocks must be complete and balanced",
            Self::EvidencePresent => "the result must carry evidence of real work",
            Self::NoEarlyTermination => "completion claims require verified files",
        }
    }

    /// True when the result passes this criterion
    pub fn evaluate(&self, result: &ExecutorResult) -> bool {
        match self {
            Self::FilesVerified => {
                result.files_modified.is_empty()
                    || result
                        .files_modified
                        .iter()
                        .all(|f| result.verified_files.iter().any(|v| &v.path == f && v.exists))
            }
            Self::NoUnfinishedMarkers => !scan_targets(result).any(|text| {
                UNFINISHED_MARKERS.iter().any(|marker| text.contains(marker))
            }),
            Self::NoOmissionMarkers => !scan_targets(result).any(|text| {
                OMISSION_MARKERS.iter().any(|marker| text.contains(marker))
                    || fenced_blocks(text).iter().any(|block| {
                        block.lines().any(|line| {
                            let trimmed = line.trim();
                            trimmed == "..." || trimmed == "…"
                        })
                    })
            }),
            Self::BalancedCodeBlocks => {
                // An odd number of fences means the transcript was cut off
                if result.output.matches("```").count() % 2 != 0 {
                    return false;
                }
                fenced_blocks(&result.output).iter().all(|block| brackets_balanced(block))
            }
            Self::EvidencePresent => {
                if result.status == ExecStatus::NoEvidence {
                    return false;
                }
                !result.verified_files.is_empty()
                    || (result.executed
                        && result.status == ExecStatus::Complete
                        && !result.files_modified.is_empty())
            }
            Self::NoEarlyTermination => {
                let claims_completion = CLOSING_PHRASES.iter().any(|phrase| {
                    if phrase.is_ascii() {
                        contains_word(&result.output, phrase)
                    } else {
                        result.output.contains(phrase)
                    }
                });
                !claims_completion || !result.verified_files.is_empty()
            }
        }
    }
}

fn scan_targets(result: &ExecutorResult) -> impl Iterator<Item = &str> {
    std::iter::once(result.output.as_str()).chain(result.file_previews.iter().map(|p| p.head.as_str()))
}

/// Contents of ``` fenced blocks, fence lines excluded
fn fenced_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Option<String> = None;
    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            match current.take() {
                Some(block) => blocks.push(block),
                None => current = Some(String::new()),
            }
        } else if let Some(block) = current.as_mut() {
            block.push_str(line);
            block.push('\n');
        }
    }
    blocks
}

fn brackets_balanced(text: &str) -> bool {
    let count = |c: char| text.chars().filter(|&x| x == c).count();
    count('{') == count('}') && count('[') == count(']') && count('(') == count(')')
}

/// ASCII word-boundary search, case-insensitive
fn contains_word(text: &str, word: &str) -> bool {
    let lowered = text.to_lowercase();
    lowered
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| token == word)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean_result() -> ExecutorResult {
        ExecutorResult::complete("wrote the file").with_verified_file("a.rs", 10)
    }

    #[test]
    fn test_all_pass_on_clean_result() {
        let result = clean_result();
        for criterion in Criterion::ALL {
            assert!(criterion.evaluate(&result), "{} failed", criterion.id());
        }
    }

    #[test]
    fn test_q1_unverified_file_fails() {
        let mut result = clean_result();
        result.files_modified.push("missing.rs".to_string());
        result.unverified_files.push("missing.rs".to_string());
        assert!(!Criterion::FilesVerified.evaluate(&result));
    }

    #[test]
    fn test_q1_no_files_expected_passes() {
        let result = ExecutorResult::complete("read-only answer");
        assert!(Criterion::FilesVerified.evaluate(&result));
    }

    #[test]
    fn test_q2_todo_in_output_fails() {
        let mut result = clean_result();
        result.output = "TODO: implement the parser".to_string();
        assert!(!Criterion::NoUnfinishedMarkers.evaluate(&result));
    }

    #[test]
    fn test_q2_fixme_in_preview_fails() {
        let mut result = clean_result();
        result.file_previews.push(crate::executor::FilePreview {
            path: "a.rs".to_string(),
            head: "fn main() {} // FIXME later".to_string(),
        });
        assert!(!Criterion::NoUnfinishedMarkers.evaluate(&result));
    }

    #[test]
    fn test_q3_japanese_omission_markers_fail() {
        for marker in OMISSION_MARKERS {
            let mut result = clean_result();
            result.output = format!("fn a() {{}}\n{}\n", marker);
            assert!(!Criterion::NoOmissionMarkers.evaluate(&result), "{marker}");
        }
    }

    #[test]
    fn test_q3_ellipsis_inside_code_block_fails() {
        let mut result = clean_result();
        result.output = "```rust\nfn a() {}\n...\n```".to_string();
        assert!(!Criterion::NoOmissionMarkers.evaluate(&result));

        // Prose ellipsis outside a fence is fine
        result.output = "And so on...".to_string();
        assert!(Criterion::NoOmissionMarkers.evaluate(&result));
    }

    #[test]
    fn test_q4_unbalanced_braces_fail() {
        let mut result = clean_result();
        result.output = "```rust\nfn broken() {\n```".to_string();
        assert!(!Criterion::BalancedCodeBlocks.evaluate(&result));

        result.output = "```rust\nfn fine() {}\n```".to_string();
        assert!(Criterion::BalancedCodeBlocks.evaluate(&result));
    }

    #[test]
    fn test_q4_unterminated_fence_fails() {
        let mut result = clean_result();
        result.output = "```rust\nfn truncated() {}".to_string();
        assert!(!Criterion::BalancedCodeBlocks.evaluate(&result));
    }

    #[test]
    fn test_q5_no_evidence_status_always_fails() {
        let mut result = clean_result();
        result.status = ExecStatus::NoEvidence;
        assert!(!Criterion::EvidencePresent.evaluate(&result));
    }

    #[test]
    fn test_q5_claimed_files_without_verification() {
        let mut result = ExecutorResult::complete("did things");
        result.files_modified.push("a.rs".to_string());
        // executed + COMPLETE + files-modified non-empty is acceptable evidence
        assert!(Criterion::EvidencePresent.evaluate(&result));

        result.executed = false;
        assert!(!Criterion::EvidencePresent.evaluate(&result));
    }

    #[test]
    fn test_q6_closing_phrase_without_files_fails() {
        let mut result = ExecutorResult::complete("All done, 完了しました");
        result.files_modified.push("a.rs".to_string());
        assert!(!Criterion::NoEarlyTermination.evaluate(&result));

        let mut verified = clean_result();
        verified.output = "完了しました".to_string();
        assert!(Criterion::NoEarlyTermination.evaluate(&verified));
    }

    #[test]
    fn test_q6_word_boundary() {
        // "undone" must not count as a completion claim
        let result = ExecutorResult::complete("the work remains undone");
        assert!(Criterion::NoEarlyTermination.evaluate(&result));
    }
}
