//! Goal-drift criteria GD1-GD5
//!
//! Optional guard against an executor quietly shrinking the task. Only
//! active when the caller selects the goal-drift template. Evaluation is
//! fail-closed: any evaluation error is reported as a rejection.

use regex::Regex;
use thiserror::Error;

use crate::executor::ExecutorResult;

use super::criteria::Criterion;

/// Phrases an executor uses to talk its way out of the full task
const ESCAPE_PHRASES: &[&str] = &[
    "for brevity",
    "simplified version",
    "due to time constraints",
    "簡略化しました",
    "省略しました",
];

/// Scope-reduction phrasing
const SCOPE_REDUCTION_PHRASES: &[&str] = &[
    "reduced the scope",
    "scaled back",
    "only implemented part",
    "一部のみ実装",
];

#[derive(Debug, Error)]
pub enum GoalDriftError {
    #[error("goal-drift evaluation failed: {0}")]
    Evaluation(String),
}

/// The five goal-drift criteria
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoalDriftCriterion {
    /// GD1: no escape phrases
    NoEscapePhrases,
    /// GD2: no premature completion claim
    NoPrematureCompletion,
    /// GD3: a requirements checklist is present
    ChecklistPresent,
    /// GD4: an explicit COMPLETE/INCOMPLETE declaration line is present
    CompletionDeclaration,
    /// GD5: no scope-reduction phrasing
    NoScopeReduction,
}

impl GoalDriftCriterion {
    pub const ALL: [GoalDriftCriterion; 5] = [
        GoalDriftCriterion::NoEscapePhrases,
        GoalDriftCriterion::NoPrematureCompletion,
        GoalDriftCriterion::ChecklistPresent,
        GoalDriftCriterion::CompletionDeclaration,
        GoalDriftCriterion::NoScopeReduction,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Self::NoEscapePhrases => "GD1",
            Self::NoPrematureCompletion => "GD2",
            Self::ChecklistPresent => "GD3",
            Self::CompletionDeclaration => "GD4",
            Self::NoScopeReduction => "GD5",
        }
    }

    /// The quality criterion each GD failure is reported under
    pub fn maps_to(&self) -> Criterion {
        match self {
            Self::NoEscapePhrases => Criterion::NoUnfinishedMarkers,
            Self::NoPrematureCompletion => Criterion::EvidencePresent,
            Self::ChecklistPresent => Criterion::EvidencePresent,
            Self::CompletionDeclaration => Criterion::EvidencePresent,
            Self::NoScopeReduction => Criterion::NoOmissionMarkers,
        }
    }

    /// True when the result passes; errors are treated as rejections by
    /// the caller.
    pub fn evaluate(&self, result: &ExecutorResult) -> Result<bool, GoalDriftError> {
        let output = &result.output;
        let lowered = output.to_lowercase();
        match self {
            Self::NoEscapePhrases => Ok(!ESCAPE_PHRASES.iter().any(|p| lowered.contains(&p.to_lowercase()))),
            Self::NoPrematureCompletion => {
                // A completion declaration with no checklist and no verified
                // files is premature
                let declares = declaration_regex()?.is_match(output);
                let declares_complete = declares && output.contains("COMPLETE:");
                Ok(!(declares_complete && !has_checklist(output) && result.verified_files.is_empty()))
            }
            Self::ChecklistPresent => Ok(has_checklist(output)),
            Self::CompletionDeclaration => Ok(declaration_regex()?.is_match(output)),
            Self::NoScopeReduction => {
                Ok(!SCOPE_REDUCTION_PHRASES.iter().any(|p| lowered.contains(&p.to_lowercase())))
            }
        }
    }
}

fn has_checklist(output: &str) -> bool {
    output.lines().any(|line| {
        let trimmed = line.trim_start();
        trimmed.starts_with("- [x]") || trimmed.starts_with("- [ ]") || trimmed.starts_with("- [X]")
    })
}

fn declaration_regex() -> Result<Regex, GoalDriftError> {
    Regex::new(r"(?m)^(COMPLETE: All \d+ requirements fulfilled|INCOMPLETE: Requirements .+ remain)")
        .map_err(|e| GoalDriftError::Evaluation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with(output: &str) -> ExecutorResult {
        let mut r = ExecutorResult::complete(output).with_verified_file("a.rs", 10);
        r.output = output.to_string();
        r
    }

    const FULL_REPORT: &str = "\
- [x] add parser
- [x] add tests
COMPLETE: All 2 requirements fulfilled";

    #[test]
    fn test_full_report_passes_everything() {
        let result = result_with(FULL_REPORT);
        for criterion in GoalDriftCriterion::ALL {
            assert!(criterion.evaluate(&result).unwrap(), "{} failed", criterion.id());
        }
    }

    #[test]
    fn test_gd1_escape_phrase_fails() {
        let result = result_with("Implemented a simplified version for brevity.");
        assert!(!GoalDriftCriterion::NoEscapePhrases.evaluate(&result).unwrap());
    }

    #[test]
    fn test_gd2_premature_completion() {
        let mut result = result_with("COMPLETE: All 5 requirements fulfilled");
        result.verified_files.clear();
        assert!(!GoalDriftCriterion::NoPrematureCompletion.evaluate(&result).unwrap());

        // Same claim with verified files is acceptable
        let backed = result_with("COMPLETE: All 5 requirements fulfilled");
        assert!(GoalDriftCriterion::NoPrematureCompletion.evaluate(&backed).unwrap());
    }

    #[test]
    fn test_gd3_missing_checklist_fails() {
        let result = result_with("did the work, trust me");
        assert!(!GoalDriftCriterion::ChecklistPresent.evaluate(&result).unwrap());
        assert!(GoalDriftCriterion::ChecklistPresent.evaluate(&result_with(FULL_REPORT)).unwrap());
    }

    #[test]
    fn test_gd4_declaration_line() {
        assert!(GoalDriftCriterion::CompletionDeclaration
            .evaluate(&result_with("COMPLETE: All 3 requirements fulfilled"))
            .unwrap());
        assert!(GoalDriftCriterion::CompletionDeclaration
            .evaluate(&result_with("INCOMPLETE: Requirements 2 and 3 remain"))
            .unwrap());
        assert!(!GoalDriftCriterion::CompletionDeclaration
            .evaluate(&result_with("everything looks complete to me"))
            .unwrap());
    }

    #[test]
    fn test_gd5_scope_reduction_fails() {
        let result = result_with("I scaled back the migration to the first table.");
        assert!(!GoalDriftCriterion::NoScopeReduction.evaluate(&result).unwrap());
    }

    #[test]
    fn test_mapping_to_quality_criteria() {
        assert_eq!(GoalDriftCriterion::NoEscapePhrases.maps_to(), Criterion::NoUnfinishedMarkers);
        assert_eq!(GoalDriftCriterion::NoPrematureCompletion.maps_to(), Criterion::EvidencePresent);
        assert_eq!(GoalDriftCriterion::ChecklistPresent.maps_to(), Criterion::EvidencePresent);
        assert_eq!(GoalDriftCriterion::CompletionDeclaration.maps_to(), Criterion::EvidencePresent);
        assert_eq!(GoalDriftCriterion::NoScopeReduction.maps_to(), Criterion::NoOmissionMarkers);
    }
}
