//! Bounded conversation history with a pinned system prompt.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Conversation transcript for one connection.
///
/// The system prompt occupies index 0 and is never evicted; when the
/// transcript exceeds `max_turns` the oldest non-system turn is dropped.
#[derive(Debug)]
pub struct ConversationHistory {
    turns: VecDeque<ChatTurn>,
    max_turns: usize,
}

impl ConversationHistory {
    pub fn new(system_prompt: &str, max_turns: usize) -> Self {
        let mut turns = VecDeque::with_capacity(max_turns + 1);
        turns.push_back(ChatTurn::system(system_prompt));
        Self { turns, max_turns }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(ChatTurn::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(ChatTurn::assistant(content));
    }

    fn push(&mut self, turn: ChatTurn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.max_turns + 1 {
            // index 0 is the pinned system prompt
            self.turns.remove(1);
        }
    }

    /// Drop everything except the system prompt.
    pub fn clear(&mut self) {
        self.turns.truncate(1);
    }

    /// Copy of the transcript, system prompt included.
    pub fn snapshot(&self) -> Vec<ChatTurn> {
        self.turns.iter().cloned().collect()
    }

    /// Number of turns excluding the system prompt.
    pub fn len(&self) -> usize {
        self.turns.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_is_pinned_under_eviction() {
        let mut history = ConversationHistory::new("be brief", 4);
        for i in 0..10 {
            history.push_user(format!("question {i}"));
            history.push_assistant(format!("answer {i}"));
        }
        let turns = history.snapshot();
        assert_eq!(turns.len(), 5);
        assert_eq!(turns[0], ChatTurn::system("be brief"));
        // oldest survivors are the most recent four turns
        assert_eq!(turns[1].content, "question 8");
        assert_eq!(turns[4].content, "answer 9");
    }

    #[test]
    fn clear_keeps_system_prompt() {
        let mut history = ConversationHistory::new("be brief", 8);
        history.push_user("hello");
        history.push_assistant("hi there");
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.snapshot(), vec![ChatTurn::system("be brief")]);
    }

    #[test]
    fn roles_serialize_lowercase() {
        let json = serde_json::to_string(&ChatTurn::user("hey")).unwrap();
        assert_eq!(json, r#"{"role":"user","content":"hey"}"#);
    }
}
