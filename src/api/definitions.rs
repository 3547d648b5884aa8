use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use std::sync::Arc;

use super::auth::AuthUser;
use super::validation::validate_page;
use super::{ApiError, ApiResponse, AppState, PageQuery};
use crate::services::{CreateDefinition, DefinitionDto, DefinitionPage, ExecutionResult};

#[derive(Debug, Deserialize)]
pub struct CreateDefinitionRequest {
    pub name: String,
    pub kind: String,
    pub content_yaml: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub input: Option<String>,
}

/// POST /definitions (admin)
pub async fn create_definition(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(payload): Json<CreateDefinitionRequest>,
) -> Result<(StatusCode, Json<ApiResponse<DefinitionDto>>), ApiError> {
    user.require_role("admin")?;

    let definition = state
        .definition_service()
        .create(
            &user.name,
            CreateDefinition {
                name: payload.name,
                kind: payload.kind,
                content_yaml: payload.content_yaml,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(definition))))
}

/// GET /definitions
pub async fn list_definitions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> Result<Json<ApiResponse<DefinitionPage>>, ApiError> {
    let (page, page_size) = validate_page(&query)?;
    let result = state.definition_service().list(page, page_size).await?;
    Ok(Json(ApiResponse::success(result)))
}

/// GET /definitions/{id}
pub async fn get_definition(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<DefinitionDto>>, ApiError> {
    let definition = state.definition_service().get(&id).await?;
    Ok(Json(ApiResponse::success(definition)))
}

/// POST /definitions/{id}/execute
pub async fn execute_definition(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Option<Json<ExecuteRequest>>,
) -> Result<Json<ApiResponse<ExecutionResult>>, ApiError> {
    let Json(request) = payload.unwrap_or_default();
    let input = request.input.unwrap_or_default();

    let result = state.definition_service().execute(&id, &input).await?;
    Ok(Json(ApiResponse::success(result)))
}
