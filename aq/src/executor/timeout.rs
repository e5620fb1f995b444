//! Progress-aware timeout model
//!
//! Timeouts are evaluated against progress events, never against stdout
//! silence alone. Idle time restarts on every event; the hard deadline is
//! absolute from the moment the run started. The only permitted
//! termination triggers are child exit, the hard deadline, and explicit
//! user cancel - idle expiry pauses the task instead of killing the child.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::TimeoutsConfig;
use crate::executor::ExecTask;

/// The three timeout profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    Standard,
    Long,
    Extended,
}

/// Concrete idle/hard limits for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutProfile {
    pub idle: Duration,
    pub hard: Duration,
}

/// Resolved profile table, built from configuration
#[derive(Debug, Clone, Copy)]
pub struct TimeoutProfiles {
    pub standard: TimeoutProfile,
    pub long: TimeoutProfile,
    pub extended: TimeoutProfile,
}

impl TimeoutProfiles {
    pub fn from_config(config: &TimeoutsConfig) -> Self {
        let profile = |p: &crate::config::ProfileConfig| TimeoutProfile {
            idle: Duration::from_millis(p.idle_ms),
            hard: Duration::from_millis(p.hard_ms),
        };
        Self {
            standard: profile(&config.standard),
            long: profile(&config.long),
            extended: profile(&config.extended),
        }
    }

    pub fn get(&self, kind: ProfileKind) -> TimeoutProfile {
        match kind {
            ProfileKind::Standard => self.standard,
            ProfileKind::Long => self.long,
            ProfileKind::Extended => self.extended,
        }
    }

    /// Profile for a task: explicit request wins, otherwise a rule-based
    /// size heuristic on the prompt.
    pub fn profile_for(&self, task: &ExecTask) -> (ProfileKind, TimeoutProfile) {
        let kind = task.profile.unwrap_or_else(|| heuristic_profile(&task.prompt));
        (kind, self.get(kind))
    }
}

impl Default for TimeoutProfiles {
    fn default() -> Self {
        Self::from_config(&TimeoutsConfig::default())
    }
}

/// Size heuristic: long prompts and explicitly whole-system asks get more
/// room to run.
pub fn heuristic_profile(prompt: &str) -> ProfileKind {
    let lowered = prompt.to_lowercase();
    let big_scope = ["entire", "full rewrite", "all modules", "全体", "すべての"]
        .iter()
        .any(|m| lowered.contains(m));

    if prompt.len() > 8_000 || (big_scope && prompt.len() > 2_000) {
        ProfileKind::Extended
    } else if prompt.len() > 2_000 || prompt.lines().count() > 30 || big_scope {
        ProfileKind::Long
    } else {
        ProfileKind::Standard
    }
}

/// Which deadline fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Idle,
    Hard,
}

/// Tracks one run's deadlines. All timestamps are Unix milliseconds.
#[derive(Debug, Clone)]
pub struct TimeoutWatch {
    profile: TimeoutProfile,
    task_created_at: i64,
    started_at: i64,
    last_progress: Option<i64>,
}

impl TimeoutWatch {
    pub fn new(profile: TimeoutProfile, task_created_at: i64, started_at: i64) -> Self {
        Self {
            profile,
            task_created_at,
            started_at,
            last_progress: None,
        }
    }

    /// Record a progress event; idle time restarts from here
    pub fn note_progress(&mut self, timestamp: i64) {
        self.last_progress = Some(self.last_progress.map_or(timestamp, |prev| prev.max(timestamp)));
    }

    /// idle_elapsed = now - max(task.created_at, last_progress)
    pub fn idle_elapsed(&self, now: i64) -> Duration {
        let anchor = self.last_progress.map_or(self.task_created_at, |p| p.max(self.task_created_at));
        Duration::from_millis((now - anchor).max(0) as u64)
    }

    /// hard_elapsed = now - started_at
    pub fn hard_elapsed(&self, now: i64) -> Duration {
        Duration::from_millis((now - self.started_at).max(0) as u64)
    }

    /// The hard deadline dominates; idle fires only while hard has not.
    pub fn check(&self, now: i64) -> Option<TimeoutKind> {
        if self.hard_elapsed(now) >= self.profile.hard {
            Some(TimeoutKind::Hard)
        } else if self.idle_elapsed(now) >= self.profile.idle {
            Some(TimeoutKind::Idle)
        } else {
            None
        }
    }

    /// Milliseconds until the hard deadline
    pub fn hard_remaining(&self, now: i64) -> Duration {
        self.profile.hard.saturating_sub(self.hard_elapsed(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queuestore::TaskType;

    fn standard() -> TimeoutProfile {
        TimeoutProfile {
            idle: Duration::from_secs(60),
            hard: Duration::from_secs(600),
        }
    }

    fn task(prompt: &str, profile: Option<ProfileKind>) -> ExecTask {
        ExecTask {
            task_id: "t1".to_string(),
            session_id: "s1".to_string(),
            prompt: prompt.to_string(),
            task_type: TaskType::Implementation,
            created_at: 0,
            user_reply: None,
            profile,
        }
    }

    #[test]
    fn test_profile_values_from_defaults() {
        let profiles = TimeoutProfiles::default();
        assert_eq!(profiles.standard.idle, Duration::from_secs(60));
        assert_eq!(profiles.standard.hard, Duration::from_secs(600));
        assert_eq!(profiles.long.idle, Duration::from_secs(120));
        assert_eq!(profiles.long.hard, Duration::from_secs(1800));
        assert_eq!(profiles.extended.idle, Duration::from_secs(300));
        assert_eq!(profiles.extended.hard, Duration::from_secs(3600));
    }

    #[test]
    fn test_explicit_profile_wins() {
        let profiles = TimeoutProfiles::default();
        let (kind, _) = profiles.profile_for(&task("tiny", Some(ProfileKind::Extended)));
        assert_eq!(kind, ProfileKind::Extended);
    }

    #[test]
    fn test_heuristic_by_size() {
        assert_eq!(heuristic_profile("fix a typo"), ProfileKind::Standard);
        assert_eq!(heuristic_profile(&"x".repeat(3_000)), ProfileKind::Long);
        assert_eq!(heuristic_profile(&"x".repeat(9_000)), ProfileKind::Extended);
        assert_eq!(heuristic_profile("rewrite the entire system"), ProfileKind::Long);
    }

    #[test]
    fn test_progress_keeps_run_alive() {
        // Events every 30s under a 60s idle limit: never idle-fires
        let mut watch = TimeoutWatch::new(standard(), 0, 0);
        let mut now = 0i64;
        for _ in 0..10 {
            now += 30_000;
            watch.note_progress(now);
            assert_eq!(watch.check(now), None, "fired at {now}");
        }
    }

    #[test]
    fn test_silence_fires_idle_at_limit() {
        let watch = TimeoutWatch::new(standard(), 0, 0);
        assert_eq!(watch.check(59_999), None);
        assert_eq!(watch.check(60_000), Some(TimeoutKind::Idle));
    }

    #[test]
    fn test_hard_deadline_dominates() {
        let mut watch = TimeoutWatch::new(standard(), 0, 0);
        // Progress right up to the hard deadline
        for i in 1..=20 {
            watch.note_progress(i * 30_000);
        }
        assert_eq!(watch.check(600_000), Some(TimeoutKind::Hard));
    }

    #[test]
    fn test_idle_anchor_is_max_of_created_and_progress() {
        // Task created at t=100s, run started at t=100s with no events yet:
        // idle counts from creation, not from zero
        let watch = TimeoutWatch::new(standard(), 100_000, 100_000);
        assert_eq!(watch.idle_elapsed(130_000), Duration::from_secs(30));
        assert_eq!(watch.check(130_000), None);
        assert_eq!(watch.check(160_000), Some(TimeoutKind::Idle));
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut watch = TimeoutWatch::new(standard(), 0, 0);
        watch.note_progress(50_000);
        // A late-arriving older event must not rewind the idle anchor
        watch.note_progress(10_000);
        assert_eq!(watch.idle_elapsed(80_000), Duration::from_secs(30));
    }
}
