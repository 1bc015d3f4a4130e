use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Future, Stream};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use bytes::BytesMut;
use tracing::{debug, instrument, warn};

use cadence_core::errors::GatewayError;
use cadence_core::provider::{CompletionRequest, CompletionStream, StreamingClient};
use cadence_core::stream::CompletionEvent;

use crate::converter::{self, RequestParams};
use crate::sse::{self, SseParser};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const SSE_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Connection settings for an OpenAI-compatible endpoint.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// API root, e.g. `https://api.deepseek.com`.
    pub base_url: String,
    pub api_key: SecretString,
    pub params: RequestParams,
}

/// Streaming client for any `/chat/completions` endpoint that speaks the
/// OpenAI wire format.
pub struct OpenAiCompatClient {
    client: Client,
    endpoint: String,
    api_key: SecretString,
    params: RequestParams,
}

impl OpenAiCompatClient {
    pub fn new(config: ClientConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::NetworkError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/chat/completions",
                config.base_url.trim_end_matches('/')
            ),
            api_key: config.api_key,
            params: config.params,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl StreamingClient for OpenAiCompatClient {
    fn name(&self) -> &str {
        "openai-compat"
    }

    fn model(&self) -> &str {
        &self.params.model
    }

    #[instrument(skip(self, request), fields(model = %self.params.model, messages = request.messages.len()))]
    async fn stream_completion(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionStream, GatewayError> {
        let body = converter::build_request_body(request, &self.params);

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .header("accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| GatewayError::NetworkError(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            debug!(status, "completion request rejected");
            return Err(GatewayError::from_status(status, body));
        }

        Ok(Box::pin(SseStream::new(resp.bytes_stream())))
    }
}

/// Wraps a byte stream from reqwest and yields [`CompletionEvent`]s.
/// Includes an idle timeout: if no data arrives within `idle_duration`,
/// the stream yields a `StreamInterrupted` error and ends.
struct SseStream {
    inner: Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>,
    parser: SseParser,
    /// Bytes after the last newline seen; may end mid-character.
    raw: BytesMut,
    /// Decoded text not yet split into events.
    buffer: String,
    pending: VecDeque<CompletionEvent>,
    idle_deadline: Pin<Box<tokio::time::Sleep>>,
    idle_duration: Duration,
    done: bool,
}

impl SseStream {
    fn new(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
    ) -> Self {
        Self::with_idle_timeout(byte_stream, SSE_IDLE_TIMEOUT)
    }

    fn with_idle_timeout(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            parser: SseParser::new(),
            raw: BytesMut::new(),
            buffer: String::new(),
            pending: VecDeque::new(),
            idle_deadline: Box::pin(tokio::time::sleep(idle_timeout)),
            idle_duration: idle_timeout,
            done: false,
        }
    }

    /// Decode complete lines only, so a character split across chunks is
    /// reassembled before it is read.
    fn absorb(&mut self, bytes: &[u8]) {
        self.raw.extend_from_slice(bytes);
        if let Some(pos) = self.raw.iter().rposition(|&b| b == b'\n') {
            let lines = self.raw.split_to(pos + 1);
            self.push_decoded(&lines);
        }
        self.drain_complete_events();
    }

    fn push_decoded(&mut self, bytes: &[u8]) {
        let text = match std::str::from_utf8(bytes) {
            Ok(text) => text.replace("\r\n", "\n"),
            Err(e) => {
                warn!(error = %e, "invalid UTF-8 in SSE body, replacing");
                String::from_utf8_lossy(bytes).replace("\r\n", "\n")
            }
        };
        self.buffer.push_str(&text);
    }

    fn drain_complete_events(&mut self) {
        while let Some(pos) = self.buffer.find("\n\n") {
            let chunk: String = self.buffer.drain(..pos + 2).collect();
            for data in sse::parse_sse_lines(&chunk) {
                self.pending.extend(self.parser.parse_data(&data));
            }
        }
    }

    fn fail(&mut self, error: GatewayError) -> Poll<Option<CompletionEvent>> {
        self.done = true;
        self.pending.clear();
        Poll::Ready(Some(CompletionEvent::Error { error }))
    }
}

impl Stream for SseStream {
    type Item = CompletionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Poll::Ready(Some(event));
            }
            if self.done || self.parser.is_finished() {
                return Poll::Ready(None);
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    // Data received, reset idle timer
                    let new_deadline = tokio::time::Instant::now() + self.idle_duration;
                    self.idle_deadline.as_mut().reset(new_deadline);

                    self.absorb(&bytes);
                }
                Poll::Ready(Some(Err(e))) => {
                    return self.fail(GatewayError::StreamInterrupted(e.to_string()));
                }
                Poll::Ready(None) => {
                    // Body ended: process remaining buffer, then finish once
                    let tail_bytes = self.raw.split();
                    if !tail_bytes.is_empty() {
                        self.push_decoded(&tail_bytes);
                    }
                    let remaining = std::mem::take(&mut self.buffer);
                    for data in sse::parse_sse_lines(&remaining) {
                        let events = self.parser.parse_data(&data);
                        self.pending.extend(events);
                    }
                    let tail = self.parser.finish();
                    self.pending.extend(tail);
                    self.done = true;
                }
                Poll::Pending => {
                    if self.idle_deadline.as_mut().poll(cx).is_ready() {
                        let secs = self.idle_duration.as_secs();
                        return self.fail(GatewayError::StreamInterrupted(format!(
                            "idle timeout after {secs}s"
                        )));
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use cadence_core::messages::Message;

    fn params() -> RequestParams {
        RequestParams {
            model: "deepseek-chat".into(),
            max_tokens: 64,
            temperature: 0.1,
            top_p: 1.0,
            prompt: String::new(),
        }
    }

    fn client_for(base_url: &str) -> OpenAiCompatClient {
        OpenAiCompatClient::new(ClientConfig {
            base_url: base_url.into(),
            api_key: SecretString::from("sk-test"),
            params: params(),
        })
        .unwrap()
    }

    fn chunk(text: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"index": 0, "delta": {"content": text}}]})
        )
    }

    fn byte_stream(
        parts: Vec<String>,
    ) -> impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static {
        futures::stream::iter(parts.into_iter().map(|p| Ok(bytes::Bytes::from(p))))
    }

    /// Serve one HTTP response, returning the raw request it answered.
    async fn serve_once(
        status: &'static str,
        body: String,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|l| {
                            let lower = l.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if raw.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: text/event-stream\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
            String::from_utf8_lossy(&raw).to_string()
        });
        (format!("http://{addr}"), handle)
    }

    #[test]
    fn client_properties() {
        let client = client_for("https://api.deepseek.com/");
        assert_eq!(client.name(), "openai-compat");
        assert_eq!(client.model(), "deepseek-chat");
        assert_eq!(client.endpoint(), "https://api.deepseek.com/chat/completions");
    }

    #[tokio::test]
    async fn streams_events_from_http_response() {
        let body = format!("{}{}data: [DONE]\n\n", chunk("Hello"), chunk(", world."));
        let (base_url, server) = serve_once("200 OK", body).await;
        let client = client_for(&base_url);

        let request = CompletionRequest {
            messages: vec![Message::user("hi")],
            tools: None,
        };
        let stream = client.stream_completion(&request).await.unwrap();
        let events: Vec<_> = stream.collect().await;

        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], CompletionEvent::ContentUpdate { text } if text == "Hello"));
        assert!(matches!(&events[1], CompletionEvent::ContentUpdate { text } if text == ", world."));
        assert!(matches!(&events[2], CompletionEvent::ContentFinished));

        let raw_request = server.await.unwrap();
        assert!(raw_request.starts_with("POST /chat/completions"));
        assert!(raw_request.to_ascii_lowercase().contains("authorization: bearer sk-test"));
        assert!(raw_request.contains(r#""stream":true"#));
    }

    #[tokio::test]
    async fn non_success_status_is_classified() {
        let (base_url, _server) =
            serve_once("401 Unauthorized", r#"{"error":"bad key"}"#.to_string()).await;
        let client = client_for(&base_url);

        let result = client.stream_completion(&CompletionRequest::default()).await;
        assert!(matches!(result, Err(GatewayError::AuthenticationFailed(_))));
    }

    #[tokio::test]
    async fn events_split_across_chunks_are_reassembled() {
        let whole = chunk("Bonjour");
        let (a, b) = whole.split_at(10);
        let parts = vec![a.to_string(), b.to_string(), "data: [DO".into(), "NE]\n\n".into()];
        let events: Vec<_> = SseStream::new(byte_stream(parts)).collect().await;

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], CompletionEvent::ContentUpdate { text } if text == "Bonjour"));
        assert!(matches!(&events[1], CompletionEvent::ContentFinished));
    }

    #[tokio::test]
    async fn multibyte_character_split_across_chunks() {
        let body = format!("{}data: [DONE]\n\n", chunk("你好"));
        let cut = body.find('你').unwrap() + 1;
        let (a, b) = body.as_bytes().split_at(cut);
        let parts = vec![
            Ok(bytes::Bytes::copy_from_slice(a)),
            Ok(bytes::Bytes::copy_from_slice(b)),
        ];
        let events: Vec<_> = SseStream::new(futures::stream::iter(parts)).collect().await;

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], CompletionEvent::ContentUpdate { text } if text == "你好"));
        assert!(matches!(&events[1], CompletionEvent::ContentFinished));
    }

    #[tokio::test]
    async fn crlf_split_across_chunks() {
        let body = chunk("Hi").replace('\n', "\r\n");
        let (a, b) = body.split_at(body.len() - 3);
        let parts = vec![a.to_string(), b.to_string()];
        let events: Vec<_> = SseStream::new(byte_stream(parts)).collect().await;

        assert!(matches!(&events[0], CompletionEvent::ContentUpdate { text } if text == "Hi"));
        assert!(matches!(events.last(), Some(CompletionEvent::ContentFinished)));
    }

    #[tokio::test]
    async fn body_end_without_done_still_finishes_once() {
        let parts = vec![chunk("partial")];
        let events: Vec<_> = SseStream::new(byte_stream(parts)).collect().await;

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], CompletionEvent::ContentFinished));
    }

    #[tokio::test]
    async fn nothing_after_done_is_yielded() {
        let parts = vec!["data: [DONE]\n\n".to_string(), chunk("ignored")];
        let events: Vec<_> = SseStream::new(byte_stream(parts)).collect().await;
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn sse_stream_idle_timeout_fires_when_no_data() {
        tokio::time::pause();

        let byte_stream = futures::stream::pending::<Result<bytes::Bytes, reqwest::Error>>();
        let mut stream = Box::pin(SseStream::with_idle_timeout(
            byte_stream,
            Duration::from_secs(5),
        ));

        tokio::time::advance(Duration::from_secs(6)).await;

        let event = stream.next().await;
        assert!(
            matches!(&event, Some(CompletionEvent::Error { error: GatewayError::StreamInterrupted(msg) }) if msg.contains("idle timeout")),
            "expected idle timeout error, got: {event:?}"
        );
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn sse_stream_idle_timeout_resets_on_data() {
        tokio::time::pause();

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<bytes::Bytes, reqwest::Error>>(16);
        let rx_stream = tokio_stream::wrappers::ReceiverStream::new(rx);
        let mut stream = Box::pin(SseStream::with_idle_timeout(
            rx_stream,
            Duration::from_secs(5),
        ));

        tx.send(Ok(bytes::Bytes::from(chunk("ping")))).await.unwrap();
        let _event = stream.next().await;

        // Less than the timeout from the reset point
        tokio::time::advance(Duration::from_secs(4)).await;

        tx.send(Ok(bytes::Bytes::from(chunk("pong")))).await.unwrap();
        let _event = stream.next().await;

        drop(tx);
        let event = stream.next().await;
        assert!(
            matches!(&event, Some(CompletionEvent::ContentFinished)),
            "expected clean finish, got: {event:?}"
        );
    }

    #[test]
    fn timeout_constants() {
        assert_eq!(CONNECT_TIMEOUT, Duration::from_secs(30));
        assert_eq!(SSE_IDLE_TIMEOUT, Duration::from_secs(90));
    }
}
