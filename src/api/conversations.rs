use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use std::sync::Arc;

use super::auth::AuthUser;
use super::validation::{parse_id, validate_page, validate_search_query};
use super::{ApiError, ApiResponse, AppState, ConversationDto, PageQuery};
use crate::domain::{AgentConfiguration, ConversationId};
use crate::services::{ConversationPage, CreateConversation};

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub configuration: Option<AgentConfiguration>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTitleRequest {
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub page: Option<u64>,
    pub page_size: Option<u64>,
}

impl SearchQuery {
    fn page_query(&self) -> PageQuery {
        let defaults = PageQuery::default();
        PageQuery {
            page: self.page.unwrap_or(defaults.page),
            page_size: self.page_size.unwrap_or(defaults.page_size),
        }
    }
}

/// POST /conversations
pub async fn create_conversation(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(payload): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ConversationDto>>), ApiError> {
    let conversation = state
        .conversation_service()
        .create(
            user.id,
            CreateConversation {
                title: payload.title,
                configuration: payload.configuration,
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(ConversationDto::from(&conversation))),
    ))
}

/// GET /conversations
pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<PageQuery>,
) -> Result<Json<ApiResponse<ConversationPage>>, ApiError> {
    let (page, page_size) = validate_page(&query)?;
    let result = state
        .conversation_service()
        .list(user.id, page, page_size)
        .await?;
    Ok(Json(ApiResponse::success(result)))
}

/// GET /conversations/search?q=
pub async fn search_conversations(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(query): Query<SearchQuery>,
) -> Result<Json<ApiResponse<ConversationPage>>, ApiError> {
    let term = validate_search_query(&query.q)?;
    let (page, page_size) = validate_page(&query.page_query())?;
    let result = state
        .conversation_service()
        .search(user.id, term, page, page_size)
        .await?;
    Ok(Json(ApiResponse::success(result)))
}

/// GET /conversations/{id}
pub async fn get_conversation(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<ConversationDto>>, ApiError> {
    let id: ConversationId = parse_id(&id, "conversation")?;
    let conversation = state.conversation_service().get(user.id, id).await?;
    Ok(Json(ApiResponse::success(ConversationDto::from(&conversation))))
}

/// PUT /conversations/{id}/title
pub async fn update_title(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(payload): Json<UpdateTitleRequest>,
) -> Result<Json<ApiResponse<ConversationDto>>, ApiError> {
    let id: ConversationId = parse_id(&id, "conversation")?;
    let conversation = state
        .conversation_service()
        .update_title(user.id, id, &payload.title)
        .await?;
    Ok(Json(ApiResponse::success(ConversationDto::from(&conversation))))
}

/// POST /conversations/{id}/archive
pub async fn archive_conversation(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let id: ConversationId = parse_id(&id, "conversation")?;
    state.conversation_service().archive(user.id, id).await?;
    Ok(Json(ApiResponse::success(())))
}

/// DELETE /conversations/{id}
pub async fn delete_conversation(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id: ConversationId = parse_id(&id, "conversation")?;
    state.conversation_service().delete(user.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
