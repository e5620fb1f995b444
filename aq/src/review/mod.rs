//! Quality review
//!
//! Q1-Q6 structural gates, the optional GD1-GD5 goal-drift guard, and the
//! PASS/REJECT/RETRY loop that iterates the executor toward an acceptable
//! result.

pub mod criteria;
pub mod goal_drift;
pub mod reviewer;

pub use criteria::Criterion;
pub use goal_drift::{GoalDriftCriterion, GoalDriftError};
pub use reviewer::{Judgment, ReviewEvent, ReviewIteration, ReviewLoop};

/// Phrases that make a COMPLETE answer look like a question back to the
/// user. READ_INFO/REPORT outputs matching this are paused for a reply
/// instead of being closed out.
const QUESTION_PHRASES: &[&str] = &[
    "should i",
    "which ",
    "do you want",
    "would you like",
    "could you clarify",
    "please confirm",
    "ですか",
    "しますか",
    "でしょうか",
];

/// Heuristic: does this output contain a clarification question?
pub fn contains_clarification_question(text: &str) -> bool {
    if text.trim().is_empty() {
        return false;
    }
    let has_question_mark = text.contains('?') || text.contains('\u{ff1f}');
    if !has_question_mark {
        return false;
    }
    let lowered = text.to_lowercase();
    QUESTION_PHRASES.iter().any(|p| lowered.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_clarification_questions() {
        assert!(contains_clarification_question("Should I use tabs or spaces?"));
        assert!(contains_clarification_question("Which file do you mean?"));
        assert!(contains_clarification_question("削除しますか?"));
        // Full-width question mark only, no ASCII '?'
        assert!(contains_clarification_question("アーカイブも含めますか\u{ff1f}"));
    }

    #[test]
    fn test_plain_answers_are_not_questions() {
        assert!(!contains_clarification_question("The config lives in src/config.rs."));
        assert!(!contains_clarification_question(""));
        // Question mark without a clarification phrase
        assert!(!contains_clarification_question("Strange file name: what?.txt"));
        // Clarification phrase without a question mark
        assert!(!contains_clarification_question("Tell me which file to edit."));
    }
}
