use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Instant};

use super::{ApiError, ApiResponse, AppState};
use crate::tools::{AgentTool, ToolParameter};

#[derive(Debug, Serialize)]
pub struct ToolDto {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl From<&dyn AgentTool> for ToolDto {
    fn from(tool: &dyn AgentTool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct InvokeToolRequest {
    #[serde(default)]
    pub arguments: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct ToolInvocationResult {
    pub tool_name: String,
    pub result: Option<serde_json::Value>,
    pub success: bool,
    pub error_message: Option<String>,
    pub invoked_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// GET /tools
pub async fn list_tools(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<ToolDto>>> {
    let tools = state
        .shared
        .tools
        .list()
        .iter()
        .map(|t| ToolDto::from(t.as_ref()))
        .collect();
    Json(ApiResponse::success(tools))
}

/// GET /tools/{name}
pub async fn get_tool(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<ToolDto>>, ApiError> {
    let tool = state
        .shared
        .tools
        .get(&name)
        .ok_or_else(|| ApiError::NotFound(format!("Tool '{name}' not found")))?;
    Ok(Json(ApiResponse::success(ToolDto::from(tool.as_ref()))))
}

/// POST /tools/{name}/invoke
/// A failing tool still reports its timing, with a 400 status
pub async fn invoke_tool(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(payload): Json<InvokeToolRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ToolInvocationResult>>), ApiError> {
    let tool = state
        .shared
        .tools
        .get(&name)
        .ok_or_else(|| ApiError::NotFound(format!("Tool '{name}' not found")))?;

    let invoked_at = Utc::now();
    let start = Instant::now();
    let outcome = tool.invoke(payload.arguments).await;
    let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    metrics::counter!(
        "tool_invocations_total",
        "tool" => name.clone(),
        "success" => outcome.is_ok().to_string()
    )
    .increment(1);

    let (status, result) = match outcome {
        Ok(value) => (
            StatusCode::OK,
            ToolInvocationResult {
                tool_name: name,
                result: Some(value),
                success: true,
                error_message: None,
                invoked_at,
                duration_ms,
            },
        ),
        Err(e) => {
            tracing::info!(tool = %name, error = %e, "Tool invocation failed");
            (
                StatusCode::BAD_REQUEST,
                ToolInvocationResult {
                    tool_name: name,
                    result: None,
                    success: false,
                    error_message: Some(e.to_string()),
                    invoked_at,
                    duration_ms,
                },
            )
        }
    };

    Ok((status, Json(ApiResponse::success(result))))
}
