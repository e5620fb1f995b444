//! Prompt decomposition analysis
//!
//! A rule-based decomposer: a prompt splits into subtasks only when it
//! carries at least two independent signals - an enumeration (numbered or
//! bulleted list) and a large-scope indicator - and the induced subtask
//! count fits the configured window. Ordering words force sequential
//! execution; everything else runs in parallel under the semaphore.

use regex::Regex;
use std::sync::LazyLock;

use crate::config::ChunkingConfig;

/// Large-scope indicators, English and Japanese
const SCOPE_INDICATORS: &[&str] = &["entire", "full", "module", "system", "全体", "すべて"];

static NUMBERED_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\d+[.)]\s+(.+)$").expect("numbered item regex"));
static BULLET_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*[-*]\s+(.+)$").expect("bullet item regex"));
static ORDERING_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(first|then|finally|after that)\b|まず|次に|最後に").expect("ordering words regex")
});

/// How subtasks run relative to each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sequential,
    Parallel,
}

/// Outcome of analysing one prompt
#[derive(Debug, Clone)]
pub struct ChunkAnalysis {
    /// Whether the prompt should be split at all
    pub decomposable: bool,

    /// The induced subtask prompts, in enumeration order
    pub items: Vec<String>,

    pub mode: ExecutionMode,
}

/// Inspect a prompt for decomposition signals
pub fn analyze_prompt(prompt: &str, config: &ChunkingConfig) -> ChunkAnalysis {
    let items: Vec<String> = prompt
        .lines()
        .filter_map(|line| {
            NUMBERED_ITEM
                .captures(line)
                .or_else(|| BULLET_ITEM.captures(line))
                .map(|c| c[1].trim().to_string())
        })
        .filter(|item| !item.is_empty())
        .collect();

    let lowered = prompt.to_lowercase();
    let has_scope = SCOPE_INDICATORS.iter().any(|s| lowered.contains(s));
    let has_enumeration = items.len() >= 2;

    let in_window = items.len() >= config.min_subtasks && items.len() <= config.max_subtasks;
    let decomposable = has_enumeration && has_scope && in_window;

    let mode = if ORDERING_WORDS.is_match(prompt) {
        ExecutionMode::Sequential
    } else {
        ExecutionMode::Parallel
    };

    ChunkAnalysis {
        decomposable,
        items,
        mode,
    }
}
