//! Turn orchestration for streaming chat completions.
//!
//! A [`ChatSession`] feeds final transcripts into a [`TurnQueue`], whose
//! worker drives the [`TurnOrchestrator`]: it builds each request from
//! [`ConversationMemory`], splits the streamed reply into sentences for the
//! [`OutputSink`], runs tool rounds through a [`ToolChannel`] one at a time,
//! and commits the exchange back to memory.
//!
//! [`ToolChannel`]: cadence_core::tools::ToolChannel

#![deny(unsafe_code)]

pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod output;
pub mod queue;
pub mod registry;
pub mod segmenter;
pub mod session;
pub mod tool_round;
pub mod truncate;
pub mod working_set;

pub use error::{ToolDispatchError, TurnError};
pub use memory::ConversationMemory;
pub use orchestrator::{dedup_messages, TurnOptions, TurnOrchestrator, TurnReport, COMPLETION_TIMEOUT};
pub use output::{CollectingSink, OutputSink, SegmentCloser, SinkEvent};
pub use queue::TurnQueue;
pub use registry::{SharedRegistry, ToolRegistry};
pub use segmenter::{segment, MAX_SENTENCE_CHARS};
pub use session::ChatSession;
pub use working_set::{TurnState, TurnWorkingSet};
