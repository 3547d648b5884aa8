//! OpenAI-compatible `/chat/completions` client.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

use crate::agents::client::{
    AgentError, ChatClient, ChatCompletion, ChatMessage, ChatRequest, ChunkStream, ToolCall,
};
use crate::config::OpenAiConfig;

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    model: String,
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct WireChunk {
    choices: Vec<WireChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChunkChoice {
    delta: WireDelta,
}

#[derive(Debug, Deserialize)]
struct WireDelta {
    content: Option<String>,
}

fn function_type() -> String {
    "function".to_string()
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: message.role.clone(),
            content: message.content.clone(),
            tool_calls: message
                .tool_calls
                .iter()
                .map(|c| WireToolCall {
                    id: c.id.clone(),
                    call_type: function_type(),
                    function: WireFunctionCall {
                        name: c.name.clone(),
                        arguments: c.arguments.clone(),
                    },
                })
                .collect(),
            tool_call_id: message.tool_call_id.clone(),
        }
    }
}

fn wire_request(request: &ChatRequest, stream: bool) -> WireRequest<'_> {
    WireRequest {
        model: &request.model,
        messages: request.messages.iter().map(WireMessage::from).collect(),
        temperature: request.temperature,
        max_tokens: request.max_tokens,
        top_p: request.top_p,
        frequency_penalty: request.frequency_penalty,
        presence_penalty: request.presence_penalty,
        tools: if stream {
            Vec::new()
        } else {
            request
                .tools
                .iter()
                .map(|t| WireTool {
                    tool_type: "function",
                    function: WireFunction {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters.clone(),
                    },
                })
                .collect()
        },
        stream,
    }
}

/// One parsed line of an SSE body.
#[derive(Debug, PartialEq, Eq)]
enum SseLine {
    Delta(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> Result<SseLine, AgentError> {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };

    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    if data.is_empty() {
        return Ok(SseLine::Skip);
    }

    let chunk: WireChunk = serde_json::from_str(data)
        .map_err(|e| AgentError::InvalidResponse(format!("Bad stream chunk: {e}")))?;

    let text: String = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .collect();

    Ok(if text.is_empty() {
        SseLine::Skip
    } else {
        SseLine::Delta(text)
    })
}

struct SseState<S> {
    inner: Pin<Box<S>>,
    buffer: Vec<u8>,
    pending: VecDeque<Result<String, AgentError>>,
    finished: bool,
}

impl<S> SseState<S> {
    /// Moves complete lines out of the buffer. Returns true once `[DONE]` is seen.
    fn drain_lines(&mut self, flush: bool) -> bool {
        loop {
            let line = match self.buffer.iter().position(|&b| b == b'\n') {
                Some(pos) => self.buffer.drain(..=pos).collect::<Vec<u8>>(),
                None if flush && !self.buffer.is_empty() => std::mem::take(&mut self.buffer),
                None => return false,
            };

            match parse_sse_line(&String::from_utf8_lossy(&line)) {
                Ok(SseLine::Delta(text)) => self.pending.push_back(Ok(text)),
                Ok(SseLine::Done) => return true,
                Ok(SseLine::Skip) => {}
                Err(e) => {
                    self.pending.push_back(Err(e));
                    return true;
                }
            }
        }
    }
}

/// Turns a chunked SSE body into content deltas, ending at `[DONE]`.
fn sse_content_stream<S, B, E>(body: S) -> ChunkStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<AgentError> + Send + 'static,
{
    let state = SseState {
        inner: Box::pin(body),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.inner.next().await {
                Some(Ok(bytes)) => {
                    state.buffer.extend_from_slice(bytes.as_ref());
                    state.finished = state.drain_lines(false);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(e.into()), state));
                }
                None => {
                    state.drain_lines(true);
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}

pub struct OpenAiChatClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OpenAiChatClient {
    pub fn new(config: &OpenAiConfig) -> Result<Self, AgentError> {
        if config.api_key.trim().is_empty() {
            return Err(AgentError::Configuration(
                "openai.api_key is empty".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn post(&self, body: &WireRequest<'_>) -> Result<reqwest::Response, AgentError> {
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AgentError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl ChatClient for OpenAiChatClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatCompletion, AgentError> {
        debug!(model = %request.model, messages = request.messages.len(), "Chat completion request");

        let response: WireResponse = self.post(&wire_request(&request, false)).await?.json().await?;

        let message = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| AgentError::InvalidResponse("No choices returned".to_string()))?;

        Ok(ChatCompletion {
            content: message.content.unwrap_or_default(),
            model: if response.model.is_empty() {
                request.model
            } else {
                response.model
            },
            tool_calls: message
                .tool_calls
                .into_iter()
                .map(|c| ToolCall {
                    id: c.id,
                    name: c.function.name,
                    arguments: c.function.arguments,
                })
                .collect(),
            total_tokens: response.usage.map(|u| u.total_tokens),
        })
    }

    async fn stream(&self, request: ChatRequest) -> Result<ChunkStream, AgentError> {
        debug!(model = %request.model, "Streaming chat completion request");

        let response = self.post(&wire_request(&request, true)).await?;
        Ok(sse_content_stream(response.bytes_stream()))
    }
}
