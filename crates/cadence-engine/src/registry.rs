use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use cadence_core::tools::{ToolDefinition, ToolMetadata};

/// Registry handle shared between the session (writer) and the turn
/// worker (reader).
pub type SharedRegistry = Arc<RwLock<ToolRegistry>>;

/// Tools the model may call, keyed by name.
#[derive(Clone, Debug, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolMetadata>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name. Returns the
    /// replaced metadata.
    pub fn register(&mut self, metadata: ToolMetadata) -> Option<ToolMetadata> {
        self.tools.insert(metadata.name.clone(), metadata)
    }

    pub fn get(&self, name: &str) -> Option<&ToolMetadata> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// List all tool names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Tool definitions for the completion request, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(ToolMetadata::to_definition).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }

    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(RwLock::new(self))
    }
}
