use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::Mutex;

use cadence_core::errors::GatewayError;
use cadence_core::ids::ToolCallId;
use cadence_core::messages::ToolCallRequest;
use cadence_core::provider::{CompletionRequest, CompletionStream, StreamingClient};
use cadence_core::stream::CompletionEvent;

/// Pre-programmed responses for deterministic testing without API calls.
pub enum MockResponse {
    /// Yield a sequence of events.
    Stream(Vec<CompletionEvent>),
    /// Yield events with a pause before each one.
    Paced(Duration, Vec<CompletionEvent>),
    /// Yield the events, then never finish.
    Stall(Vec<CompletionEvent>),
    /// Return an error from `stream_completion` itself.
    Error(GatewayError),
    /// Wait a duration, then resolve the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    /// One `ContentUpdate` per chunk, then `ContentFinished`.
    pub fn text(chunks: &[&str]) -> Self {
        let mut events: Vec<_> = chunks.iter().map(|c| CompletionEvent::content(*c)).collect();
        events.push(CompletionEvent::ContentFinished);
        Self::Stream(events)
    }

    /// A single tool call followed by `ContentFinished`.
    pub fn tool_call(id: &str, name: &str, arguments: &str) -> Self {
        Self::Stream(vec![
            tool_call_event(id, name, arguments),
            CompletionEvent::ContentFinished,
        ])
    }

    /// A stream that ends with an error event.
    pub fn stream_error(error: GatewayError) -> Self {
        Self::Stream(vec![CompletionEvent::Error { error }])
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Build a `ToolCall` event.
pub fn tool_call_event(id: &str, name: &str, arguments: &str) -> CompletionEvent {
    CompletionEvent::ToolCall {
        call: ToolCallRequest {
            id: ToolCallId::from_raw(id),
            function_name: name.to_string(),
            arguments: arguments.to_string(),
        },
    }
}

/// Mock client that returns pre-programmed responses in sequence and
/// records every request it receives.
pub struct MockClient {
    responses: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockClient {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue another response behind the existing ones.
    pub fn push(&self, response: MockResponse) {
        self.responses.lock().push_back(response);
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.requests.lock().last().cloned()
    }
}

#[async_trait]
impl StreamingClient for MockClient {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn stream_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionStream, GatewayError> {
        let idx = {
            let mut requests = self.requests.lock();
            requests.push(request.clone());
            requests.len() - 1
        };

        let next = self.responses.lock().pop_front();
        let Some(response) = next else {
            return Err(GatewayError::InvalidRequest(format!(
                "MockClient: no response configured for call {idx}"
            )));
        };

        resolve_response(response).await
    }
}

/// Resolve a MockResponse, handling Delay by sleeping first.
/// Unrolls nested delays iteratively to avoid recursive async.
async fn resolve_response(response: MockResponse) -> Result<CompletionStream, GatewayError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Stream(events) => return Ok(Box::pin(stream::iter(events))),
            MockResponse::Paced(gap, events) => {
                let paced = stream::iter(events).then(move |event| async move {
                    tokio::time::sleep(gap).await;
                    event
                });
                return Ok(Box::pin(paced));
            }
            MockResponse::Stall(events) => {
                return Ok(Box::pin(stream::iter(events).chain(stream::pending())));
            }
            MockResponse::Error(e) => return Err(e),
            MockResponse::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
        }
    }
}
