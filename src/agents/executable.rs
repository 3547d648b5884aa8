use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use super::client::{AgentError, ChatClient, ChatCompletion, ChatMessage, ChatRequest, ToolSpec};
use crate::domain::ToolInvocation;
use crate::tools::AgentTool;

/// Upper bound on model → tool → model round trips per request.
pub const MAX_TOOL_ROUNDS: usize = 5;

#[derive(Debug, Clone)]
pub struct ToolLoopOutput {
    pub completion: ChatCompletion,
    pub transcript: Vec<ChatMessage>,
    pub tool_invocations: Vec<ToolInvocation>,
}

#[must_use]
pub fn tool_specs(tools: &[Arc<dyn AgentTool>]) -> Vec<ToolSpec> {
    tools
        .iter()
        .map(|t| ToolSpec {
            name: t.name().to_string(),
            description: t.description().to_string(),
            parameters: t.json_schema(),
        })
        .collect()
}

/// Sends `request`, executing any tool calls the model makes until it answers in text.
pub async fn run_tool_loop(
    client: &dyn ChatClient,
    mut request: ChatRequest,
    tools: &[Arc<dyn AgentTool>],
) -> Result<ToolLoopOutput, AgentError> {
    let mut invocations = Vec::new();

    for round in 0..MAX_TOOL_ROUNDS {
        let completion = client.complete(request.clone()).await?;

        if completion.tool_calls.is_empty() {
            request.messages.push(ChatMessage::assistant(completion.content.clone()));
            return Ok(ToolLoopOutput {
                completion,
                transcript: request.messages,
                tool_invocations: invocations,
            });
        }

        debug!(round, calls = completion.tool_calls.len(), "Model requested tool calls");

        request.messages.push(ChatMessage {
            role: "assistant".to_string(),
            content: (!completion.content.is_empty()).then(|| completion.content.clone()),
            tool_calls: completion.tool_calls.clone(),
            tool_call_id: None,
        });

        for call in &completion.tool_calls {
            let invoked_at = Utc::now();
            let started = Instant::now();

            let result = match tools.iter().find(|t| t.name() == call.name) {
                Some(tool) => {
                    let arguments = serde_json::from_str(&call.arguments)
                        .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()));
                    match tool.invoke(arguments).await {
                        Ok(value) => value.to_string(),
                        Err(e) => {
                            warn!(tool = %call.name, error = %e, "Tool invocation failed");
                            serde_json::json!({ "error": e.to_string() }).to_string()
                        }
                    }
                }
                None => serde_json::json!({ "error": format!("Unknown tool '{}'", call.name) })
                    .to_string(),
            };

            invocations.push(ToolInvocation {
                tool_name: call.name.clone(),
                arguments: call.arguments.clone(),
                result: Some(result.clone()),
                invoked_at,
                duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            });
            request.messages.push(ChatMessage::tool_result(&call.id, result));
        }
    }

    Err(AgentError::TooManyToolRounds(MAX_TOOL_ROUNDS))
}

/// An agent built from a declarative definition.
#[derive(Clone)]
pub struct AgentExecutable {
    pub name: String,
    pub instructions: String,
    pub model: String,
    tools: Vec<Arc<dyn AgentTool>>,
    client: Option<Arc<dyn ChatClient>>,
}

impl std::fmt::Debug for AgentExecutable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentExecutable")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("tools", &self.tool_names())
            .finish_non_exhaustive()
    }
}

impl AgentExecutable {
    #[must_use]
    pub fn new(
        name: String,
        instructions: String,
        model: String,
        tools: Vec<Arc<dyn AgentTool>>,
        client: Option<Arc<dyn ChatClient>>,
    ) -> Self {
        Self {
            name,
            instructions,
            model,
            tools,
            client,
        }
    }

    #[must_use]
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Runs the agent once: its instructions as the system prompt, `input` as the user turn.
    pub async fn execute(&self, input: &str) -> Result<ToolLoopOutput, AgentError> {
        let client = self.client.as_deref().ok_or_else(|| {
            AgentError::Configuration(format!("No chat client available for '{}'", self.name))
        })?;

        let mut messages = Vec::with_capacity(2);
        if !self.instructions.trim().is_empty() {
            messages.push(ChatMessage::system(self.instructions.clone()));
        }
        messages.push(ChatMessage::user(input));

        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            tools: tool_specs(&self.tools),
            ..ChatRequest::default()
        };

        run_tool_loop(client, request, &self.tools).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::ScriptedChatClient;
    use crate::agents::client::ToolCall;
    use crate::tools::builtin::WebSearchTool;

    #[tokio::test]
    async fn test_execute_sends_instructions_and_tools() {
        let client = Arc::new(ScriptedChatClient::replying(["done"]));
        let exe = AgentExecutable::new(
            "helper".to_string(),
            "Be brief".to_string(),
            "gpt-4o-mini".to_string(),
            vec![Arc::new(WebSearchTool)],
            Some(client.clone()),
        );

        let output = exe.execute("hello").await.unwrap();
        assert_eq!(output.completion.content, "done");

        let request = client.last_request().unwrap();
        assert_eq!(request.model, "gpt-4o-mini");
        assert_eq!(request.messages[0], ChatMessage::system("Be brief"));
        assert_eq!(request.messages[1], ChatMessage::user("hello"));
        assert_eq!(request.tools[0].name, "web_search");
    }

    #[tokio::test]
    async fn test_tool_calls_are_executed_and_recorded() {
        let client = Arc::new(ScriptedChatClient::new(vec![
            ChatCompletion {
                tool_calls: vec![ToolCall {
                    id: "call_1".to_string(),
                    name: "web_search".to_string(),
                    arguments: r#"{"query":"rust"}"#.to_string(),
                }],
                ..ChatCompletion::default()
            },
            ChatCompletion {
                content: "Rust is a language".to_string(),
                ..ChatCompletion::default()
            },
        ]));
        let exe = AgentExecutable::new(
            "searcher".to_string(),
            String::new(),
            "gpt-4o".to_string(),
            vec![Arc::new(WebSearchTool)],
            Some(client.clone()),
        );

        let output = exe.execute("what is rust").await.unwrap();
        assert_eq!(output.completion.content, "Rust is a language");
        assert_eq!(output.tool_invocations.len(), 1);
        assert_eq!(output.tool_invocations[0].tool_name, "web_search");

        let second = client.last_request().unwrap();
        let tool_msg = second.messages.iter().find(|m| m.role == "tool").unwrap();
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_1"));
        assert!(tool_msg.text().contains("Example Result"));
    }

    #[tokio::test]
    async fn test_missing_client_is_configuration_error() {
        let exe = AgentExecutable::new(
            "offline".to_string(),
            String::new(),
            "gpt-4o".to_string(),
            Vec::new(),
            None,
        );
        assert!(matches!(
            exe.execute("hi").await,
            Err(AgentError::Configuration(_))
        ));
    }
}
