use tokio::task::{JoinError, JoinHandle};

use cadence_core::messages::{Message, Role};

use crate::tool_round::ToolRoundOutcome;

/// Lifecycle of one turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnState {
    Building,
    Streaming,
    AwaitingCompletion,
    Committed,
    Failed,
}

/// Per-turn scratch state, created fresh for every turn.
#[derive(Debug)]
pub struct TurnWorkingSet {
    /// Tentative transcript of the turn.
    pub message_cache: Vec<Message>,
    /// Trailing text not yet closed into a sentence.
    pub sentence_fragment: String,
    pub tool_task: ToolTaskSlot,
    pub state: TurnState,
}

impl Default for TurnWorkingSet {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnWorkingSet {
    pub fn new() -> Self {
        Self {
            message_cache: Vec::new(),
            sentence_fragment: String::new(),
            tool_task: ToolTaskSlot::default(),
            state: TurnState::Building,
        }
    }

    /// Append streamed text to the most recent assistant entry, or start a
    /// new one if the cache holds none.
    pub fn append_content(&mut self, text: &str) {
        match self
            .message_cache
            .iter_mut()
            .rev()
            .find(|m| m.role == Role::Assistant)
        {
            Some(entry) => entry.append_text(text),
            None => self.message_cache.push(Message::assistant(text)),
        }
    }

    /// Drop the last cache entry (the tentative reply).
    pub fn discard_tentative(&mut self) -> Option<Message> {
        self.message_cache.pop()
    }

    pub fn assistant_entries(&self) -> impl Iterator<Item = &Message> {
        self.message_cache
            .iter()
            .filter(|m| m.role == Role::Assistant)
    }
}

/// Holds at most one outstanding tool round. Dropping the slot aborts
/// the round it holds.
#[derive(Debug, Default)]
pub struct ToolTaskSlot {
    handle: Option<JoinHandle<ToolRoundOutcome>>,
}

impl ToolTaskSlot {
    pub fn is_occupied(&self) -> bool {
        self.handle.is_some()
    }

    /// Place `handle` in the slot. The slot must be empty; a previous
    /// round still held is aborted.
    pub fn occupy(&mut self, handle: JoinHandle<ToolRoundOutcome>) {
        if let Some(previous) = self.handle.replace(handle) {
            previous.abort();
        }
    }

    /// Wait for the held round and release the slot. `None` when empty.
    ///
    /// The handle stays in the slot while waiting, so a cancelled wait
    /// still aborts the round on drop.
    pub async fn settle(&mut self) -> Option<Result<ToolRoundOutcome, JoinError>> {
        let handle = self.handle.as_mut()?;
        let result = handle.await;
        self.handle = None;
        Some(result)
    }

    pub fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for ToolTaskSlot {
    fn drop(&mut self) {
        self.abort();
    }
}
