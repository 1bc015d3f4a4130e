//! Turn orchestration: build the request, stream the completion, run at
//! most one tool round at a time, commit to memory, close the output.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, instrument, warn};

use cadence_core::ids::TurnId;
use cadence_core::messages::{Message, Role, ToolCallRequest};
use cadence_core::provider::{CompletionRequest, StreamingClient};
use cadence_core::stream::{dispatch, CompletionListener};
use cadence_core::tools::{ToolChannel, ToolDefinition};

use crate::error::{ToolDispatchError, TurnError};
use crate::memory::ConversationMemory;
use crate::output::{OutputSink, SegmentCloser};
use crate::registry::SharedRegistry;
use crate::segmenter::segment;
use crate::tool_round::{run_tool_round, ToolRoundContext, ToolRoundOutcome};
use crate::working_set::{TurnState, TurnWorkingSet};

/// Bound on the wait from issuing a request to its completion.
pub const COMPLETION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TurnOptions {
    /// Send no tool definitions and ignore tool calls.
    pub no_tool: bool,
    /// Send only the new messages, without conversation memory.
    pub no_memory: bool,
}

impl TurnOptions {
    /// Options for a sub-turn produced by a tool round.
    pub fn follow_up() -> Self {
        Self {
            no_tool: true,
            no_memory: false,
        }
    }
}

/// Summary of a committed turn.
#[derive(Debug)]
pub struct TurnReport {
    pub turn_id: TurnId,
    pub state: TurnState,
    /// Sentences delivered to the sink.
    pub sentences: usize,
    /// Assistant messages stored in memory at commit.
    pub committed: usize,
    pub tool_failures: Vec<ToolDispatchError>,
    /// Sub-turns produced by this turn's tool rounds, in the order they ran.
    pub follow_ups: Vec<Result<TurnReport, TurnError>>,
}

/// Drives turns for one conversation. Owns the conversation memory; one
/// turn runs at a time because `run_turn` takes `&mut self`.
pub struct TurnOrchestrator {
    client: Arc<dyn StreamingClient>,
    tools: SharedRegistry,
    channel: Arc<dyn ToolChannel>,
    sink: Arc<dyn OutputSink>,
    memory: ConversationMemory,
}

impl TurnOrchestrator {
    pub fn new(
        client: Arc<dyn StreamingClient>,
        tools: SharedRegistry,
        channel: Arc<dyn ToolChannel>,
        sink: Arc<dyn OutputSink>,
        max_memory_length: usize,
    ) -> Self {
        Self {
            client,
            tools,
            channel,
            sink,
            memory: ConversationMemory::new(max_memory_length),
        }
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn tools(&self) -> SharedRegistry {
        Arc::clone(&self.tools)
    }

    pub fn sink(&self) -> Arc<dyn OutputSink> {
        Arc::clone(&self.sink)
    }

    /// Run one turn, then every sub-turn its tool rounds produced.
    ///
    /// Sub-turns run after the parent has committed, in production order,
    /// each to completion with its own end-of-segment marker. A failing
    /// sub-turn is recorded in the report and does not fail the parent.
    pub async fn run_turn(
        &mut self,
        messages: Vec<Message>,
        options: TurnOptions,
    ) -> Result<TurnReport, TurnError> {
        let (mut report, follow_ups) = self.run_single(TurnId::new(), messages, options).await?;

        let mut pending: VecDeque<Vec<Message>> = follow_ups.into();
        while let Some(messages) = pending.pop_front() {
            let turn_id = TurnId::new();
            debug!(parent = %report.turn_id, turn_id = %turn_id, "running follow-up turn");
            let result = self
                .run_single(turn_id, messages, TurnOptions::follow_up())
                .await
                .map(|(sub_report, nested)| {
                    pending.extend(nested);
                    sub_report
                });
            report.follow_ups.push(result);
        }

        Ok(report)
    }

    #[instrument(
        skip_all,
        fields(turn_id = %turn_id, no_tool = options.no_tool, no_memory = options.no_memory)
    )]
    async fn run_single(
        &mut self,
        turn_id: TurnId,
        messages: Vec<Message>,
        options: TurnOptions,
    ) -> Result<(TurnReport, Vec<Vec<Message>>), TurnError> {
        let _closer = SegmentCloser::new(Arc::clone(&self.sink));

        if let Err(e) = validate_messages(&messages) {
            error!(error = %e, "rejecting turn input");
            return Err(e);
        }

        // Building
        let mut ws = TurnWorkingSet::new();
        for message in messages.iter().filter(|m| m.is_meaningful()) {
            ws.message_cache.push(message.clone());
            self.memory.append(message.clone());
        }
        if ws.message_cache.is_empty() {
            ws.message_cache.push(Message::assistant(""));
        }

        let history = if options.no_memory {
            Vec::new()
        } else {
            self.memory.snapshot()
        };
        let request = CompletionRequest {
            messages: dedup_messages(history.into_iter().chain(messages.iter().cloned()).collect()),
            tools: self.tool_definitions(options),
        };

        // Streaming
        ws.state = TurnState::Streaming;
        debug!(
            client = self.client.name(),
            model = self.client.model(),
            messages = request.messages.len(),
            tools = request.tools.as_ref().map_or(0, Vec::len),
            "issuing completion request"
        );

        let mut listener = TurnListener {
            ws,
            sink: Arc::clone(&self.sink),
            round: ToolRoundContext {
                registry: Arc::clone(&self.tools),
                channel: Arc::clone(&self.channel),
                first_content: messages.first().and_then(|m| m.content.clone()),
            },
            no_tool: options.no_tool,
            follow_ups: Vec::new(),
            failures: Vec::new(),
            sentences: 0,
        };

        let client = &self.client;
        let completion = async {
            match client.stream_completion(&request).await {
                Ok(stream) => dispatch(stream, &mut listener).await,
                Err(e) => Err(e),
            }
        };
        let outcome = tokio::time::timeout(COMPLETION_TIMEOUT, completion).await;

        let TurnListener {
            mut ws,
            follow_ups,
            failures,
            sentences,
            ..
        } = listener;

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(TurnError::Stream(e)),
            Err(_) => Some(TurnError::CompletionTimeout(COMPLETION_TIMEOUT)),
        };
        if let Some(e) = failure {
            let reached = ws.state;
            ws.tool_task.abort();
            ws.state = TurnState::Failed;
            error!(error = %e, kind = e.error_kind(), reached = ?reached, "turn failed");
            return Err(e);
        }

        // Committed
        let mut committed = 0;
        for message in ws.assistant_entries() {
            if self.memory.append(message.clone()) {
                committed += 1;
            }
        }
        ws.state = TurnState::Committed;
        if !ws.sentence_fragment.is_empty() {
            debug!(fragment = %ws.sentence_fragment, "unterminated fragment left unspoken");
        }
        info!(
            sentences,
            committed,
            follow_ups = follow_ups.len(),
            tool_failures = failures.len(),
            memory = self.memory.len(),
            "turn committed"
        );

        let report = TurnReport {
            turn_id,
            state: ws.state,
            sentences,
            committed,
            tool_failures: failures,
            follow_ups: Vec::new(),
        };
        Ok((report, follow_ups))
    }

    fn tool_definitions(&self, options: TurnOptions) -> Option<Vec<ToolDefinition>> {
        if options.no_tool {
            return None;
        }
        let definitions = self.tools.read().definitions();
        (!definitions.is_empty()).then_some(definitions)
    }
}

/// Reject messages whose shape cannot be sent.
fn validate_messages(messages: &[Message]) -> Result<(), TurnError> {
    for (index, message) in messages.iter().enumerate() {
        if message.content.is_none() && !message.has_tool_calls() {
            return Err(TurnError::MalformedInput {
                index,
                reason: "content is neither text nor content parts".into(),
            });
        }
        if message.role == Role::Tool && message.tool_call_id.is_none() {
            return Err(TurnError::MalformedInput {
                index,
                reason: "tool message without tool_call_id".into(),
            });
        }
    }
    Ok(())
}

/// Drop later messages repeating an earlier `(role, content)` pair.
pub fn dedup_messages(messages: Vec<Message>) -> Vec<Message> {
    let keep: Vec<bool> = {
        let mut seen = HashSet::new();
        messages.iter().map(|m| seen.insert(m.dedup_key())).collect()
    };
    messages
        .into_iter()
        .zip(keep)
        .filter_map(|(message, keep)| keep.then_some(message))
        .collect()
}

/// Receives one completion's events on behalf of a turn.
struct TurnListener {
    ws: TurnWorkingSet,
    sink: Arc<dyn OutputSink>,
    round: ToolRoundContext,
    no_tool: bool,
    follow_ups: Vec<Vec<Message>>,
    failures: Vec<ToolDispatchError>,
    sentences: usize,
}

impl TurnListener {
    async fn settle_tool_round(&mut self) {
        match self.ws.tool_task.settle().await {
            None => {}
            Some(Ok(outcome)) => self.apply(outcome),
            Some(Err(join_err)) => {
                let err = ToolDispatchError::TaskPanicked(join_err.to_string());
                error!(error = %err, "tool round did not complete");
                self.failures.push(err);
            }
        }
    }

    fn apply(&mut self, outcome: ToolRoundOutcome) {
        if outcome.discard_tentative {
            if let Some(dropped) = self.ws.discard_tentative() {
                debug!(role = dropped.role.as_str(), "discarded tentative reply");
            }
        }
        self.follow_ups.extend(outcome.follow_ups);
        self.failures.extend(outcome.failures);
    }
}

#[async_trait]
impl CompletionListener for TurnListener {
    async fn on_tool_call(&mut self, call: ToolCallRequest) {
        if self.no_tool {
            warn!(tool = %call.function_name, "ignoring tool call in a tool-less turn");
            return;
        }
        // One round in flight at a time: finish the held round first.
        if self.ws.tool_task.is_occupied() {
            debug!(tool = %call.function_name, "waiting for previous tool round");
            self.settle_tool_round().await;
        }
        let handle = tokio::spawn(run_tool_round(self.round.clone(), call));
        self.ws.tool_task.occupy(handle);
    }

    async fn on_content_update(&mut self, text: String) {
        self.ws.append_content(&text);
        let (sentences, fragment) = segment(&self.ws.sentence_fragment, &text);
        self.ws.sentence_fragment = fragment;
        for sentence in sentences {
            self.sink.send_text(&sentence, false);
            self.sentences += 1;
        }
    }

    async fn on_content_finished(&mut self) {
        self.ws.state = TurnState::AwaitingCompletion;
        self.settle_tool_round().await;
    }
}
