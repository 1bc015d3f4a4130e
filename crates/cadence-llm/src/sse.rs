use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::warn;

use cadence_core::errors::GatewayError;
use cadence_core::ids::ToolCallId;
use cadence_core::messages::ToolCallRequest;
use cadence_core::stream::CompletionEvent;

const DONE_SENTINEL: &str = "[DONE]";

/// State machine for OpenAI-style `chat.completion.chunk` streams.
///
/// Text deltas are forwarded as they arrive. Tool calls arrive as
/// fragments keyed by `index` and are only emitted, in index order, once
/// the choice reports a `finish_reason` or the stream ends.
#[derive(Default)]
pub struct SseParser {
    tool_calls: BTreeMap<usize, PartialToolCall>,
    finished: bool,
}

#[derive(Default)]
struct PartialToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once `ContentFinished` or an error has been produced.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Parse one `data:` payload into zero or more events.
    pub fn parse_data(&mut self, data: &str) -> Vec<CompletionEvent> {
        if self.finished {
            return Vec::new();
        }
        if data.trim() == DONE_SENTINEL {
            return self.finish();
        }

        let chunk: ChatChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(error = %e, "skipping unparseable stream chunk");
                return Vec::new();
            }
        };

        if let Some(err) = chunk.error {
            self.finished = true;
            return vec![CompletionEvent::Error {
                error: classify_error(&err),
            }];
        }

        let mut events = Vec::new();
        for choice in chunk.choices {
            if let Some(delta) = choice.delta {
                if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                    events.push(CompletionEvent::ContentUpdate { text });
                }
                for fragment in delta.tool_calls.unwrap_or_default() {
                    self.accumulate(fragment);
                }
            }
            if choice.finish_reason.is_some() {
                events.extend(self.drain_tool_calls());
            }
        }
        events
    }

    /// End of body: flush pending tool calls and finish exactly once.
    pub fn finish(&mut self) -> Vec<CompletionEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        let mut events = self.drain_tool_calls();
        events.push(CompletionEvent::ContentFinished);
        events
    }

    fn accumulate(&mut self, fragment: ToolCallFragment) {
        let entry = self.tool_calls.entry(fragment.index).or_default();
        if let Some(id) = fragment.id.filter(|id| !id.is_empty()) {
            entry.id = Some(id);
        }
        if let Some(function) = fragment.function {
            if let Some(name) = function.name {
                entry.name.push_str(&name);
            }
            if let Some(arguments) = function.arguments {
                entry.arguments.push_str(&arguments);
            }
        }
    }

    fn drain_tool_calls(&mut self) -> Vec<CompletionEvent> {
        std::mem::take(&mut self.tool_calls)
            .into_values()
            .filter(|partial| !partial.name.is_empty())
            .map(|partial| CompletionEvent::ToolCall {
                call: ToolCallRequest {
                    id: partial
                        .id
                        .map(ToolCallId::from_raw)
                        .unwrap_or_default(),
                    function_name: partial.name,
                    arguments: if partial.arguments.is_empty() {
                        "{}".to_string()
                    } else {
                        partial.arguments
                    },
                },
            })
            .collect()
    }
}

fn classify_error(err: &ErrorPayload) -> GatewayError {
    let message = err.message.clone().unwrap_or_default();
    match err.error_type.as_deref().or(err.code_str()) {
        Some("authentication_error" | "invalid_api_key") => {
            GatewayError::AuthenticationFailed(message)
        }
        Some("rate_limit_error" | "rate_limit_exceeded") => GatewayError::RateLimited,
        Some("overloaded_error" | "server_overloaded") => GatewayError::ProviderOverloaded,
        Some("invalid_request_error") => GatewayError::InvalidRequest(message),
        _ => GatewayError::Provider(message),
    }
}

/// Extract the `data:` payloads from raw SSE text.
///
/// Multi-line data fields are joined with `\n`; comments and other
/// fields (`event:`, `id:`, `retry:`) are ignored.
pub fn parse_sse_lines(raw: &str) -> Vec<String> {
    let mut payloads = Vec::new();
    let mut current: Option<String> = None;

    for line in raw.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            if let Some(data) = current.take() {
                payloads.push(data);
            }
        } else if let Some(data) = line.strip_prefix("data:") {
            let data = data.strip_prefix(' ').unwrap_or(data);
            match &mut current {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(data);
                }
                None => current = Some(data.to_string()),
            }
        }
    }

    // Handle trailing event without blank line
    if let Some(data) = current {
        payloads.push(data);
    }

    payloads
}

// --- Deserialization types for chat completion chunks ---

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<ErrorPayload>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    delta: Option<ChunkDelta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChunkDelta {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCallFragment>>,
}

#[derive(Deserialize)]
struct ToolCallFragment {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<FunctionFragment>,
}

#[derive(Deserialize)]
struct FunctionFragment {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct ErrorPayload {
    message: Option<String>,
    #[serde(rename = "type")]
    error_type: Option<String>,
    code: Option<serde_json::Value>,
}

impl ErrorPayload {
    fn code_str(&self) -> Option<&str> {
        self.code.as_ref().and_then(serde_json::Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_chunk(text: &str) -> String {
        serde_json::json!({
            "object": "chat.completion.chunk",
            "choices": [{"index": 0, "delta": {"content": text}, "finish_reason": null}]
        })
        .to_string()
    }

    #[test]
    fn parse_simple_text_stream() {
        let mut parser = SseParser::new();

        let events = parser.parse_data(&text_chunk("Hello"));
        assert!(matches!(&events[..], [CompletionEvent::ContentUpdate { text }] if text == "Hello"));

        let events = parser.parse_data(&text_chunk(" world!"));
        assert_eq!(events.len(), 1);

        let events = parser.parse_data(r#"{"choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#);
        assert!(events.is_empty());

        let events = parser.parse_data("[DONE]");
        assert!(matches!(&events[..], [CompletionEvent::ContentFinished]));
        assert!(parser.is_finished());
    }

    #[test]
    fn empty_content_deltas_are_skipped() {
        let mut parser = SseParser::new();
        let events = parser.parse_data(
            r#"{"choices":[{"index":0,"delta":{"role":"assistant","content":""}}]}"#,
        );
        assert!(events.is_empty());
    }

    #[test]
    fn tool_call_fragments_accumulate_by_index() {
        let mut parser = SseParser::new();

        parser.parse_data(
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_a","type":"function","function":{"name":"get_weather","arguments":""}}]}}]}"#,
        );
        parser.parse_data(
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":1,"id":"call_b","function":{"name":"get_time","arguments":"{}"}}]}}]}"#,
        );
        parser.parse_data(
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"city\":"}}]}}]}"#,
        );
        parser.parse_data(
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"Paris\"}"}}]}}]}"#,
        );

        let events = parser.parse_data(
            r#"{"choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#,
        );
        assert_eq!(events.len(), 2);
        match &events[0] {
            CompletionEvent::ToolCall { call } => {
                assert_eq!(call.id.as_str(), "call_a");
                assert_eq!(call.function_name, "get_weather");
                assert_eq!(call.arguments, r#"{"city":"Paris"}"#);
            }
            other => panic!("expected ToolCall, got {other:?}"),
        }
        match &events[1] {
            CompletionEvent::ToolCall { call } => {
                assert_eq!(call.id.as_str(), "call_b");
                assert_eq!(call.arguments, "{}");
            }
            other => panic!("expected ToolCall, got {other:?}"),
        }

        let events = parser.parse_data("[DONE]");
        assert!(matches!(&events[..], [CompletionEvent::ContentFinished]));
    }

    #[test]
    fn pending_tool_calls_flush_on_finish() {
        let mut parser = SseParser::new();
        parser.parse_data(
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_x","function":{"name":"lookup","arguments":"{}"}}]}}]}"#,
        );
        let events = parser.finish();
        assert!(matches!(&events[0], CompletionEvent::ToolCall { call } if call.function_name == "lookup"));
        assert!(matches!(&events[1], CompletionEvent::ContentFinished));
    }

    #[test]
    fn finish_is_emitted_once() {
        let mut parser = SseParser::new();
        assert_eq!(parser.parse_data("[DONE]").len(), 1);
        assert!(parser.finish().is_empty());
        assert!(parser.parse_data(&text_chunk("late")).is_empty());
    }

    #[test]
    fn parse_error_payload() {
        let mut parser = SseParser::new();
        let events = parser.parse_data(
            r#"{"error":{"message":"slow down","type":"rate_limit_error"}}"#,
        );
        assert!(matches!(
            &events[..],
            [CompletionEvent::Error { error: GatewayError::RateLimited }]
        ));
        assert!(parser.finish().is_empty());
    }

    #[test]
    fn unknown_error_type_is_provider_error() {
        let mut parser = SseParser::new();
        let events = parser.parse_data(r#"{"error":{"message":"boom"}}"#);
        assert!(matches!(
            &events[..],
            [CompletionEvent::Error { error: GatewayError::Provider(msg) }] if msg == "boom"
        ));
    }

    #[test]
    fn garbage_chunk_is_ignored() {
        let mut parser = SseParser::new();
        assert!(parser.parse_data("{not json").is_empty());
        assert!(!parser.is_finished());
    }

    #[test]
    fn parse_sse_lines_basic() {
        let raw = "data: {\"a\":1}\n\n: keep-alive\n\ndata: [DONE]\n\n";
        let payloads = parse_sse_lines(raw);
        assert_eq!(payloads, vec!["{\"a\":1}".to_string(), "[DONE]".to_string()]);
    }

    #[test]
    fn parse_sse_lines_multiline_and_crlf() {
        let raw = "event: message\r\ndata: first\r\ndata:second\r\n\r\ndata: tail";
        let payloads = parse_sse_lines(raw);
        assert_eq!(payloads, vec!["first\nsecond".to_string(), "tail".to_string()]);
    }
}
