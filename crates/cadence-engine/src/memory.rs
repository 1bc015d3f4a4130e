use std::collections::VecDeque;

use cadence_core::messages::Message;

/// Bounded log of committed messages, oldest first.
///
/// Appending past `max_len` evicts from the front. Messages without
/// content are never stored.
#[derive(Clone, Debug)]
pub struct ConversationMemory {
    messages: VecDeque<Message>,
    max_len: usize,
}

impl ConversationMemory {
    pub fn new(max_len: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(max_len.min(1024)),
            max_len,
        }
    }

    /// Store `message` unless its content is empty. Returns whether it
    /// was stored.
    pub fn append(&mut self, message: Message) -> bool {
        if !message.has_content() {
            return false;
        }
        self.messages.push_back(message);
        while self.messages.len() > self.max_len {
            self.messages.pop_front();
        }
        true
    }

    /// Owned copy of the current log, oldest first.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }
}
