use async_trait::async_trait;
use futures::StreamExt;

use crate::errors::GatewayError;
use crate::messages::ToolCallRequest;
use crate::provider::CompletionStream;

/// Events emitted by a streaming completion. Contract:
///
/// (ContentUpdate | ToolCall)* → ContentFinished
///
/// Error can appear at any point and ends the stream.
#[derive(Clone, Debug)]
pub enum CompletionEvent {
    ContentUpdate { text: String },
    ToolCall { call: ToolCallRequest },
    ContentFinished,
    Error { error: GatewayError },
}

impl CompletionEvent {
    pub fn content(text: impl Into<String>) -> Self {
        Self::ContentUpdate { text: text.into() }
    }
}

/// Receiver of the three completion channels.
#[async_trait]
pub trait CompletionListener: Send {
    async fn on_tool_call(&mut self, call: ToolCallRequest);
    async fn on_content_update(&mut self, text: String);
    async fn on_content_finished(&mut self);
}

/// Feed `stream` into `listener`, one event at a time, in arrival order.
///
/// Returns once `on_content_finished` has run. An `Error` event, or a
/// stream that ends without finishing, is returned as an error.
pub async fn dispatch<L>(mut stream: CompletionStream, listener: &mut L) -> Result<(), GatewayError>
where
    L: CompletionListener + ?Sized,
{
    while let Some(event) = stream.next().await {
        match event {
            CompletionEvent::ContentUpdate { text } => listener.on_content_update(text).await,
            CompletionEvent::ToolCall { call } => listener.on_tool_call(call).await,
            CompletionEvent::ContentFinished => {
                listener.on_content_finished().await;
                return Ok(());
            }
            CompletionEvent::Error { error } => return Err(error),
        }
    }
    Err(GatewayError::StreamInterrupted(
        "stream ended before content finished".into(),
    ))
}
