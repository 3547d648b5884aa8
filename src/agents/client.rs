//! Provider-neutral chat completion types.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Chat client not configured: {0}")]
    Configuration(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Chat API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Tool loop exceeded {0} rounds")]
    TooManyToolRounds(usize),
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// JSON-encoded arguments as produced by the model.
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn plain(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain("assistant", content)
    }

    #[must_use]
    pub fn tool_result(tool_call_id: &str, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.to_string()),
            ..Self::plain("tool", content)
        }
    }

    #[must_use]
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

/// A function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub tools: Vec<ToolSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatCompletion {
    pub content: String,
    pub model: String,
    pub tool_calls: Vec<ToolCall>,
    /// Provider-reported usage when available.
    pub total_tokens: Option<u32>,
}

pub type ChunkStream = BoxStream<'static, Result<String, AgentError>>;

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatCompletion, AgentError>;

    /// Streams content deltas. Tools are not offered on streamed requests.
    async fn stream(&self, request: ChatRequest) -> Result<ChunkStream, AgentError>;
}
