use serde::{Deserialize, Serialize};

const DEFAULT_PROMPT: &str = "You are a voice assistant who talks in a conversational way. \
Answer in the language the user speaks. Your answers are read aloud by a text-to-speech \
engine, so keep them short, avoid markdown, lists and special characters, and express \
options as natural sentences.";

/// OpenAI-compatible chat completion endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LlmSettings {
    /// API root; `/chat/completions` is appended.
    pub base_url: String,
    /// Bearer token. Empty means "not configured".
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    /// System prompt sent ahead of every request; empty disables it.
    pub prompt: String,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com".to_string(),
            api_key: String::new(),
            model: "deepseek-chat".to_string(),
            max_tokens: 512,
            temperature: 0.1,
            top_p: 1.0,
            prompt: DEFAULT_PROMPT.to_string(),
        }
    }
}
