//! Chat session surface: transcripts in, turns queued, output managed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use cadence_core::ids::SessionId;
use cadence_core::messages::Message;
use cadence_core::tools::ToolMetadata;

use crate::orchestrator::{TurnOptions, TurnOrchestrator};
use crate::output::OutputSink;
use crate::queue::TurnQueue;
use crate::registry::SharedRegistry;

/// One conversation: owns the admission queue and, through it, the
/// orchestrator and its memory.
pub struct ChatSession {
    id: SessionId,
    queue: TurnQueue,
    tools: SharedRegistry,
    sink: Arc<dyn OutputSink>,
    greeting: String,
    users: AtomicUsize,
}

impl ChatSession {
    /// Start a session around `orchestrator`. Spawns the queue worker, so
    /// this must run inside a tokio runtime.
    pub fn new(orchestrator: TurnOrchestrator, greeting: impl Into<String>) -> Self {
        let tools = orchestrator.tools();
        let sink = orchestrator.sink();
        let id = SessionId::new();
        info!(session_id = %id, "chat session started");
        Self {
            id,
            queue: TurnQueue::spawn(orchestrator),
            tools,
            sink,
            greeting: greeting.into(),
            users: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Handle a transcript. Only final, non-empty text starts a turn.
    pub fn on_text(&self, text: &str, is_final: bool) {
        if !is_final {
            debug!(session_id = %self.id, text, "ignoring partial transcript");
            return;
        }
        if text.is_empty() {
            warn!(session_id = %self.id, "ignoring empty transcript");
            return;
        }
        debug!(session_id = %self.id, text, "queueing turn");
        self.queue
            .submit(vec![Message::user(text)], TurnOptions::default());
    }

    pub fn on_user_joined(&self) {
        let count = self.users.fetch_add(1, Ordering::SeqCst) + 1;
        info!(session_id = %self.id, users = count, "user joined");
        if count == 1 && !self.greeting.is_empty() {
            self.sink.send_text(&self.greeting, true);
        }
    }

    pub fn on_user_left(&self) {
        let previous = self
            .users
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or_default();
        info!(
            session_id = %self.id,
            users = previous.saturating_sub(1),
            "user left"
        );
    }

    pub fn users_count(&self) -> usize {
        self.users.load(Ordering::SeqCst)
    }

    /// Cancel queued and in-flight turns, then discard unplayed output.
    pub fn flush(&self) {
        let dropped = self.queue.flush();
        self.sink.flush();
        info!(session_id = %self.id, dropped, "session flushed");
    }

    /// Register `metadata`, replacing any tool of the same name.
    pub fn update_tools(&self, metadata: ToolMetadata) {
        let name = metadata.name.clone();
        let (replaced, registered) = {
            let mut registry = self.tools.write();
            let replaced = registry.register(metadata).is_some();
            (replaced, registry.names())
        };
        info!(
            session_id = %self.id,
            tool = %name,
            replaced,
            registered = ?registered,
            "tool registered"
        );
    }

    /// Wait until every queued turn has run.
    pub async fn idle(&self) {
        self.queue.idle().await;
    }

    /// Watch the number of turns finished so far.
    pub fn finished_turns(&self) -> tokio::sync::watch::Receiver<u64> {
        self.queue.finished()
    }

    /// Stop after the in-flight turn. Returns the orchestrator so its
    /// memory can be inspected.
    pub async fn shutdown(self) -> Option<TurnOrchestrator> {
        info!(session_id = %self.id, "chat session stopping");
        self.queue.shutdown().await
    }
}
