use serde::{Deserialize, Serialize};

/// Conversation behaviour.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChatSettings {
    /// Bound on committed messages kept as conversation memory.
    pub max_memory_length: usize,
    /// Spoken when the first user joins; empty disables it.
    pub greeting: String,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            max_memory_length: 10,
            greeting: String::new(),
        }
    }
}
