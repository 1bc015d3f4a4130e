use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::errors::GatewayError;
use crate::messages::Message;
use crate::stream::CompletionEvent;
use crate::tools::ToolDefinition;

pub type CompletionStream = Pin<Box<dyn Stream<Item = CompletionEvent> + Send>>;

/// Everything a client needs to issue one streaming completion.
#[derive(Clone, Debug, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    /// `None` when tools are disabled for the turn or none are registered.
    pub tools: Option<Vec<ToolDefinition>>,
}

/// Trait implemented by each streaming chat-completion backend.
#[async_trait]
pub trait StreamingClient: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    /// Issue the request. Errors here mean the stream never started.
    async fn stream_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionStream, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_request_has_no_tools() {
        let req = CompletionRequest::default();
        assert!(req.messages.is_empty());
        assert!(req.tools.is_none());
    }
}
