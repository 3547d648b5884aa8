//! Tools an agent can call, and the registry they are looked up in.

pub mod builtin;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool '{0}' not found")]
    NotFound(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool execution failed: {0}")]
    Execution(String),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    pub description: String,
    pub required: bool,
}

impl ToolParameter {
    #[must_use]
    pub fn required_string(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type: "string".to_string(),
            description: description.to_string(),
            required: true,
        }
    }
}

#[async_trait]
pub trait AgentTool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters(&self) -> Vec<ToolParameter>;

    async fn invoke(&self, arguments: serde_json::Value) -> Result<serde_json::Value, ToolError>;

    /// JSON schema advertised to chat models.
    fn json_schema(&self) -> serde_json::Value {
        let params = self.parameters();
        let properties: serde_json::Map<String, serde_json::Value> = params
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    serde_json::json!({ "type": p.param_type, "description": p.description }),
                )
            })
            .collect();
        let required: Vec<&str> = params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Concurrent name → tool map. The first registration of a name wins.
#[derive(Default)]
pub struct ToolRegistry {
    tools: DashMap<String, Arc<dyn AgentTool>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the built-in tools.
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(builtin::WebSearchTool));
        registry.register(Arc::new(builtin::CodeExecutionTool));
        registry
    }

    /// Returns false if a tool with the same name was already registered.
    pub fn register(&self, tool: Arc<dyn AgentTool>) -> bool {
        match self.tools.entry(tool.name().to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(tool);
                true
            }
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn AgentTool>> {
        self.tools.get(name).map(|t| Arc::clone(t.value()))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All tools sorted by name.
    #[must_use]
    pub fn list(&self) -> Vec<Arc<dyn AgentTool>> {
        let mut tools: Vec<_> = self.tools.iter().map(|t| Arc::clone(t.value())).collect();
        tools.sort_by(|a, b| a.name().cmp(b.name()));
        tools
    }
}
