//! One tool round: resolve the call against the registry, invoke the
//! tool channel, and turn the decoded result into follow-up work.

use std::sync::Arc;

use tracing::{error, info, warn};

use cadence_core::messages::{to_content_parts, Message, MessageContent, ToolCallRequest};
use cadence_core::tools::{ToolChannel, ToolResult};

use crate::error::ToolDispatchError;
use crate::registry::SharedRegistry;
use crate::truncate::{truncate_output, MAX_TOOL_RESULT_BYTES};

/// What a tool round needs, cloned into its task.
#[derive(Clone)]
pub struct ToolRoundContext {
    pub registry: SharedRegistry,
    pub channel: Arc<dyn ToolChannel>,
    /// Content of the turn's first input message; the base of a requery.
    pub first_content: Option<MessageContent>,
}

/// Result of one round, applied by the turn that owns it.
#[derive(Debug, Default)]
pub struct ToolRoundOutcome {
    /// Message lists to run as sub-turns, in order.
    pub follow_ups: Vec<Vec<Message>>,
    /// Drop the tentative assistant reply (last message-cache entry).
    pub discard_tentative: bool,
    pub failures: Vec<ToolDispatchError>,
}

impl ToolRoundOutcome {
    fn fail(error: ToolDispatchError) -> Self {
        error!(error = %error, "tool dispatch failed");
        Self {
            failures: vec![error],
            ..Self::default()
        }
    }
}

/// Run `call` through the tool channel and classify the result.
pub async fn run_tool_round(ctx: ToolRoundContext, call: ToolCallRequest) -> ToolRoundOutcome {
    let tool = call.function_name.clone();
    let registered = ctx.registry.read().contains(&tool);
    if !registered {
        return ToolRoundOutcome::fail(ToolDispatchError::NoMatchingTool(tool));
    }

    info!(tool = %tool, call_id = %call.id, "dispatching tool call");
    let raw = match ctx.channel.call_tool(&tool, &call.arguments).await {
        Ok(raw) => raw,
        Err(source) => {
            return ToolRoundOutcome::fail(ToolDispatchError::Failed { tool, source });
        }
    };

    match ToolResult::decode(raw) {
        Ok(ToolResult::LlmResult { content }) => {
            let content = truncate_output(&content, MAX_TOOL_RESULT_BYTES);
            let call_id = call.id.clone();
            ToolRoundOutcome {
                follow_ups: vec![vec![
                    Message::assistant_tool_calls(vec![call]),
                    Message::tool(call_id, content),
                ]],
                ..ToolRoundOutcome::default()
            }
        }
        Ok(ToolResult::Requery { content }) => {
            let mut parts = to_content_parts(ctx.first_content.as_ref());
            parts.extend(content.to_parts());
            if parts.is_empty() {
                warn!(tool = %tool, "requery produced no content");
            }
            ToolRoundOutcome {
                follow_ups: vec![vec![Message::user_parts(parts)]],
                discard_tentative: true,
                ..ToolRoundOutcome::default()
            }
        }
        Err(source) => ToolRoundOutcome::fail(ToolDispatchError::UnknownResult { tool, source }),
    }
}
