//! # cadence-llm
//!
//! Streaming chat-completion clients. [`OpenAiCompatClient`] talks to any
//! endpoint that speaks the OpenAI `/chat/completions` SSE format;
//! [`MockClient`] replays scripted event sequences for tests.

pub mod converter;
pub mod mock;
pub mod provider;
pub mod sse;

pub use converter::RequestParams;
pub use mock::{MockClient, MockResponse};
pub use provider::{ClientConfig, OpenAiCompatClient};
