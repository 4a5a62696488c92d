use std::collections::HashMap;
use std::time::Duration;

use crate::controller::{ChatMessage, ChatView};

/// How long a code block shows its "copied" label.
pub const COPY_FEEDBACK: Duration = Duration::from_secs(2);

/// Addresses one code block inside the message list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRef {
    pub message: usize,
    pub block: usize,
}

/// Everything the window shows: messages, the input line, the thinking
/// indicator and per-block copy feedback.
#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
    input: String,
    thinking: bool,
    copied: HashMap<BlockRef, u64>,
    next_copy_token: u64,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// False shows the pre-conversation welcome screen.
    pub fn has_messages(&self) -> bool {
        !self.messages.is_empty()
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, value: String) {
        self.input = value;
    }

    pub fn is_thinking(&self) -> bool {
        self.thinking
    }

    pub fn code_for(&self, block: BlockRef) -> Option<&str> {
        match self.messages.get(block.message)? {
            ChatMessage::Bot { reply, .. } => reply
                .code_blocks
                .get(block.block)
                .map(|code| code.code.as_str()),
            ChatMessage::User(_) => None,
        }
    }

    /// Switch a block to its copied state. The returned token must be handed
    /// back to [`clear_copied`](Self::clear_copied) when the feedback expires.
    pub fn mark_copied(&mut self, block: BlockRef) -> Option<u64> {
        self.code_for(block)?;
        self.next_copy_token += 1;
        self.copied.insert(block, self.next_copy_token);
        Some(self.next_copy_token)
    }

    /// Only the most recent press of a block may clear it.
    pub fn clear_copied(&mut self, block: BlockRef, token: u64) {
        if self.copied.get(&block) == Some(&token) {
            self.copied.remove(&block);
        }
    }

    pub fn is_copied(&self, block: BlockRef) -> bool {
        self.copied.contains_key(&block)
    }
}

impl ChatView for Transcript {
    fn set_thinking(&mut self, visible: bool) {
        self.thinking = visible;
    }

    fn push_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    fn clear_messages(&mut self) {
        self.messages.clear();
        self.copied.clear();
    }

    fn clear_input(&mut self) {
        self.input.clear();
    }
}
