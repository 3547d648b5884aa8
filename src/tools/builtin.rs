use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;

use super::{AgentTool, ToolError, ToolParameter};

const SIMULATED_LATENCY: Duration = Duration::from_millis(100);

fn string_arg<'a>(arguments: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments(format!("'{key}' must be a string")))
}

/// Placeholder search that returns a fixed result set.
pub struct WebSearchTool;

#[async_trait]
impl AgentTool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current information"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::required_string("query", "Search query")]
    }

    async fn invoke(&self, arguments: Value) -> Result<Value, ToolError> {
        let query = string_arg(&arguments, "query")?;
        tokio::time::sleep(SIMULATED_LATENCY).await;

        Ok(json!({
            "query": query,
            "results": [
                {
                    "title": "Example Result",
                    "snippet": "Example snippet",
                    "url": "https://example.com"
                }
            ]
        }))
    }
}

/// Placeholder sandbox that reports success without running anything.
pub struct CodeExecutionTool;

#[async_trait]
impl AgentTool for CodeExecutionTool {
    fn name(&self) -> &str {
        "code_execution"
    }

    fn description(&self) -> &str {
        "Execute Python code in a sandboxed environment"
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::required_string("code", "Python code to execute")]
    }

    async fn invoke(&self, arguments: Value) -> Result<Value, ToolError> {
        string_arg(&arguments, "code")?;
        tokio::time::sleep(SIMULATED_LATENCY).await;

        Ok(json!({
            "success": true,
            "output": "Execution completed",
            "executionTimeMs": 100
        }))
    }
}
