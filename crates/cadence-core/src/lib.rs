//! Shared data model for the cadence turn orchestrator: conversation
//! messages, tool call/result shapes, streaming completion events and the
//! client trait every provider implements.

pub mod errors;
pub mod ids;
pub mod messages;
pub mod provider;
pub mod stream;
pub mod tools;
