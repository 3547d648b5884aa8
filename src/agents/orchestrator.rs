use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use super::client::{AgentError, ChatClient, ChatMessage, ChatRequest, ChunkStream};
use super::executable::{AgentExecutable, run_tool_loop, tool_specs};
use crate::domain::{AgentConfiguration, Conversation, Message, MessageRole, ToolInvocation};
use crate::tools::ToolRegistry;

const PRIMARY_INSTRUCTIONS: &str =
    "You are a helpful AI assistant. Use available tools when needed to help the user.";

#[derive(Debug, Clone, Serialize)]
pub struct AgentResponse {
    pub content: String,
    pub tokens_used: u32,
    pub response_time_ms: u64,
    pub model_used: String,
    pub tool_invocations: Vec<ToolInvocation>,
}

/// Rough token count: one token per four characters.
#[must_use]
pub fn estimate_tokens(text: &str) -> u32 {
    u32::try_from(text.chars().count() / 4).unwrap_or(u32::MAX)
}

fn chat_message(message: &Message) -> Option<ChatMessage> {
    let mut text = message.content.text().to_string();
    for attachment in message.content.attachments() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&format!(
            "[Attachment: {} ({})]",
            attachment.file_name, attachment.content_type
        ));
    }

    match message.role {
        MessageRole::System => Some(ChatMessage::system(text)),
        MessageRole::User => Some(ChatMessage::user(text)),
        MessageRole::Assistant => Some(ChatMessage::assistant(text)),
        // Tool output is only meaningful next to the call that produced it.
        MessageRole::Tool => None,
    }
}

fn build_request(configuration: &AgentConfiguration, history: &[Message]) -> ChatRequest {
    let mut messages = vec![ChatMessage::system(PRIMARY_INSTRUCTIONS)];
    messages.extend(history.iter().filter_map(chat_message));

    ChatRequest {
        model: configuration.model_name.clone(),
        messages,
        temperature: Some(configuration.temperature),
        max_tokens: Some(configuration.max_tokens),
        top_p: configuration.top_p,
        frequency_penalty: configuration.frequency_penalty,
        presence_penalty: configuration.presence_penalty,
        tools: Vec::new(),
    }
}

fn last_user_text(history: &[Message]) -> &str {
    history
        .iter()
        .rev()
        .find(|m| m.role == MessageRole::User)
        .map_or("", |m| m.content.text())
}

/// Runs conversations and declarative agents against the configured chat client.
pub struct AgentOrchestrator {
    client: Option<Arc<dyn ChatClient>>,
    tools: Arc<ToolRegistry>,
}

impl AgentOrchestrator {
    #[must_use]
    pub fn new(client: Option<Arc<dyn ChatClient>>, tools: Arc<ToolRegistry>) -> Self {
        Self { client, tools }
    }

    #[must_use]
    pub fn chat_client(&self) -> Option<Arc<dyn ChatClient>> {
        self.client.clone()
    }

    fn client(&self) -> Result<&dyn ChatClient, AgentError> {
        self.client.as_deref().ok_or_else(|| {
            AgentError::Configuration("OpenAI API key is not configured".to_string())
        })
    }

    /// Produces the assistant reply to `history`, the conversation's messages so far.
    pub async fn execute(
        &self,
        conversation: &Conversation,
        history: &[Message],
    ) -> Result<AgentResponse, AgentError> {
        let client = self.client()?;
        let started = Instant::now();

        let tools = self.tools.list();
        let mut request = build_request(&conversation.configuration, history);
        request.tools = tool_specs(&tools);

        let output = run_tool_loop(client, request, &tools).await?;
        let content = output.completion.content;
        let tokens_used = estimate_tokens(&format!("{}{}", last_user_text(history), content));

        Ok(AgentResponse {
            tokens_used,
            response_time_ms: elapsed_ms(started),
            model_used: conversation.configuration.model_name.clone(),
            tool_invocations: output.tool_invocations,
            content,
        })
    }

    /// Streams the assistant reply to `history` as text deltas.
    pub async fn stream(
        &self,
        conversation: &Conversation,
        history: &[Message],
    ) -> Result<ChunkStream, AgentError> {
        let client = self.client()?;
        client
            .stream(build_request(&conversation.configuration, history))
            .await
    }

    pub async fn execute_definition(
        &self,
        executable: &AgentExecutable,
        input: &str,
    ) -> Result<AgentResponse, AgentError> {
        let started = Instant::now();

        match executable.execute(input).await {
            Ok(output) => {
                let all_text: Vec<&str> = output.transcript.iter().map(ChatMessage::text).collect();
                let response = AgentResponse {
                    tokens_used: estimate_tokens(&all_text.join("\n")),
                    response_time_ms: elapsed_ms(started),
                    model_used: executable.model.clone(),
                    tool_invocations: output.tool_invocations,
                    content: output.completion.content,
                };
                info!(
                    agent = %executable.name,
                    duration_ms = response.response_time_ms,
                    "Declarative agent execution finished"
                );
                Ok(response)
            }
            Err(e) => {
                warn!(agent = %executable.name, error = %e, "Declarative agent execution failed");
                Err(e)
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
