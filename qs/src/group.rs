//! Task group - the conversation-scoped container shared by all tasks of
//! one thread. The group owns the conversation history; it is never split.

use serde::{Deserialize, Serialize};

use crate::now_ms;

/// Task group lifecycle; driven by user actions, never by the poller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupState {
    #[default]
    Created,
    Active,
    Paused,
    Completed,
}

/// Who authored a conversation entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One entry of a group's append-only conversation history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl ConversationEntry {
    pub fn new(role: Role, content: impl Into<String>, task_id: Option<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: now_ms(),
            task_id,
        }
    }
}

/// Conversation-scoped container sharing one history and one identifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGroup {
    pub task_group_id: String,
    pub session_id: String,
    pub namespace: String,
    pub state: GroupState,

    /// Append-only ordered conversation history
    pub conversation_history: Vec<ConversationEntry>,

    /// Files the conversation has touched (set semantics)
    pub working_files: Vec<String>,

    /// Ordered change summaries accumulated across the conversation
    pub accumulated_changes: Vec<String>,

    pub created_at: i64,
    pub updated_at: i64,
}

impl TaskGroup {
    /// Create a fresh group
    pub fn new(
        task_group_id: impl Into<String>,
        session_id: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        let now = now_ms();
        Self {
            task_group_id: task_group_id.into(),
            session_id: session_id.into(),
            namespace: namespace.into(),
            state: GroupState::Created,
            conversation_history: Vec::new(),
            working_files: Vec::new(),
            accumulated_changes: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a conversation entry
    pub fn append_entry(&mut self, entry: ConversationEntry) {
        self.conversation_history.push(entry);
        self.updated_at = now_ms();
    }

    /// Add a working file, keeping the list a set
    pub fn add_working_file(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !self.working_files.contains(&path) {
            self.working_files.push(path);
            self.updated_at = now_ms();
        }
    }

    /// Record an accumulated change summary
    pub fn add_change(&mut self, change: impl Into<String>) {
        self.accumulated_changes.push(change.into());
        self.updated_at = now_ms();
    }

    /// Update the group state
    pub fn set_state(&mut self, state: GroupState) {
        self.state = state;
        self.updated_at = now_ms();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_group() {
        let g = TaskGroup::new("g1", "s1", "ns");
        assert_eq!(g.state, GroupState::Created);
        assert!(g.conversation_history.is_empty());
    }

    #[test]
    fn test_history_is_ordered() {
        let mut g = TaskGroup::new("g1", "s1", "ns");
        g.append_entry(ConversationEntry::new(Role::User, "first", None));
        g.append_entry(ConversationEntry::new(Role::Assistant, "second", Some("t1".into())));
        assert_eq!(g.conversation_history.len(), 2);
        assert_eq!(g.conversation_history[0].content, "first");
        assert_eq!(g.conversation_history[1].task_id.as_deref(), Some("t1"));
    }

    #[test]
    fn test_working_files_are_a_set() {
        let mut g = TaskGroup::new("g1", "s1", "ns");
        g.add_working_file("a.rs");
        g.add_working_file("b.rs");
        g.add_working_file("a.rs");
        assert_eq!(g.working_files, vec!["a.rs", "b.rs"]);
    }

    #[test]
    fn test_serde_round_trip() {
        let mut g = TaskGroup::new("g1", "s1", "ns");
        g.append_entry(ConversationEntry::new(Role::User, "hello", None));
        g.set_state(GroupState::Active);

        let json = serde_json::to_string(&g).unwrap();
        let back: TaskGroup = serde_json::from_str(&json).unwrap();
        assert_eq!(back.task_group_id, "g1");
        assert_eq!(back.state, GroupState::Active);
        assert_eq!(back.conversation_history.len(), 1);
    }
}
