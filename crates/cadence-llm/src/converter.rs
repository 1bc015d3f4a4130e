use std::collections::{HashMap, HashSet};

use serde_json::{json, Value};
use tracing::debug;

use cadence_core::messages::{Message, Role, ToolCallRequest};
use cadence_core::provider::CompletionRequest;
use cadence_core::tools::ToolDefinition;

/// Sampling parameters and prompt applied to every request.
#[derive(Clone, Debug)]
pub struct RequestParams {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    /// Prepended as a system message when non-empty.
    pub prompt: String,
}

/// Convert a [`CompletionRequest`] into an OpenAI-compatible
/// `/chat/completions` request body.
pub fn build_request_body(request: &CompletionRequest, params: &RequestParams) -> Value {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if !params.prompt.is_empty() {
        messages.push(json!({"role": "system", "content": params.prompt}));
    }
    messages.extend(convert_messages(&request.messages));

    let mut body = json!({
        "model": params.model,
        "messages": messages,
        "stream": true,
        "max_tokens": params.max_tokens,
        "temperature": params.temperature,
        "top_p": params.top_p,
    });

    if let Some(tools) = request.tools.as_ref().filter(|t| !t.is_empty()) {
        body["tools"] = json!(tools.iter().map(convert_tool).collect::<Vec<_>>());
    }

    body
}

fn convert_tool(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters_schema,
        },
        "strict": true,
    })
}

/// Convert messages to wire format, pairing tool results with their calls.
///
/// Each tool-role message is emitted directly after the assistant message
/// that declared its `tool_call_id`, wherever it appeared in the input.
/// Tool messages nobody declared are dropped, and tool calls nobody
/// answered are stripped; the API rejects both.
fn convert_messages(messages: &[Message]) -> Vec<Value> {
    let mut results: HashMap<&str, &Message> = HashMap::new();
    for msg in messages.iter().filter(|m| m.role == Role::Tool) {
        if let Some(id) = &msg.tool_call_id {
            results.entry(id.as_str()).or_insert(msg);
        }
    }

    let mut answered: HashSet<&str> = HashSet::new();
    let mut result = Vec::with_capacity(messages.len());

    for msg in messages.iter().filter(|m| m.role != Role::Tool) {
        let calls: Vec<&ToolCallRequest> = msg
            .tool_calls
            .iter()
            .flatten()
            .filter(|c| results.contains_key(c.id.as_str()) && !answered.contains(c.id.as_str()))
            .collect();

        if msg.has_tool_calls() && calls.is_empty() && !msg.has_content() {
            debug!("dropping assistant message with only unanswered tool calls");
            continue;
        }

        result.push(convert_message(msg, &calls));
        for call in calls {
            let id = call.id.as_str();
            answered.insert(id);
            if let Some(tool_msg) = results.get(id) {
                result.push(convert_message(tool_msg, &[]));
            }
        }
    }

    let orphans = results.len() - answered.len();
    if orphans > 0 {
        debug!(orphans, "dropping tool messages without a matching call");
    }

    result
}

fn convert_message(msg: &Message, calls: &[&ToolCallRequest]) -> Value {
    let mut entry = json!({
        "role": msg.role.as_str(),
        "content": msg.content,
    });

    if let Some(id) = &msg.tool_call_id {
        entry["tool_call_id"] = json!(id);
    }

    if !calls.is_empty() {
        let calls: Vec<Value> = calls
            .iter()
            .map(|c| {
                json!({
                    "id": c.id,
                    "type": "function",
                    "function": {
                        "name": c.function_name,
                        "arguments": c.arguments,
                    },
                })
            })
            .collect();
        entry["tool_calls"] = json!(calls);
    }

    entry
}
