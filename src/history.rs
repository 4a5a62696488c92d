use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One exchanged message. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    role: Role,
    text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: Role::User, text: text.into() }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self { role: Role::Model, text: text.into() }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Ordered log of turns sent to the API as conversation context.
///
/// Only three mutations exist: append, truncate to the newest entries, clear.
#[derive(Debug, Default, Clone)]
pub struct HistoryBuffer {
    turns: Vec<Turn>,
}

impl HistoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Keep only the last `max_len` turns, dropping the oldest first.
    pub fn truncate(&mut self, max_len: usize) {
        if self.turns.len() > max_len {
            let excess = self.turns.len() - max_len;
            self.turns.drain(..excess);
        }
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_keeps_order() {
        let mut history = HistoryBuffer::new();
        history.append(Turn::user("hello"));
        history.append(Turn::model("hi there"));

        assert_eq!(history.len(), 2);
        assert_eq!(history.turns()[0].role(), Role::User);
        assert_eq!(history.turns()[1].text(), "hi there");
    }

    #[test]
    fn test_truncate_drops_oldest() {
        let mut history = HistoryBuffer::new();
        for i in 0..12 {
            history.append(Turn::user(format!("msg {}", i)));
        }

        history.truncate(10);

        assert_eq!(history.len(), 10);
        assert_eq!(history.turns()[0].text(), "msg 2");
        assert_eq!(history.turns()[9].text(), "msg 11");
    }

    #[test]
    fn test_truncate_shorter_buffer_is_noop() {
        let mut history = HistoryBuffer::new();
        history.append(Turn::user("only"));
        history.truncate(10);
        assert_eq!(history.snapshot(), vec![Turn::user("only")]);
    }

    #[test]
    fn test_clear() {
        let mut history = HistoryBuffer::new();
        history.append(Turn::user("a"));
        history.append(Turn::model("b"));
        history.clear();
        assert!(history.is_empty());
    }

    #[test]
    fn test_role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Model).unwrap(), "\"model\"");
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
    }
}
