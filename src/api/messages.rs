use axum::{
    Json,
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::{convert::Infallible, sync::Arc, time::Duration};

use super::auth::AuthUser;
use super::validation::parse_id;
use super::{ApiError, ApiResponse, AppState, MessageDto, MessageExchangeDto};
use crate::domain::{Attachment, ConversationId, MessageId};
use crate::services::{ConversationError, SendMessage};

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl From<SendMessageRequest> for SendMessage {
    fn from(req: SendMessageRequest) -> Self {
        Self {
            content: req.content,
            attachments: req.attachments,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RegenerateRequest {
    pub message_id: String,
}

/// GET /conversations/{id}/messages
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Vec<MessageDto>>>, ApiError> {
    let id: ConversationId = parse_id(&id, "conversation")?;
    let messages = state
        .conversation_service()
        .list_messages(user.id, id)
        .await?;

    Ok(Json(ApiResponse::success(
        messages.into_iter().map(MessageDto::from).collect(),
    )))
}

/// POST /conversations/{id}/messages
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<Json<ApiResponse<MessageExchangeDto>>, ApiError> {
    let id: ConversationId = parse_id(&id, "conversation")?;
    let exchange = state
        .conversation_service()
        .send_message(user.id, id, payload.into())
        .await?;

    Ok(Json(ApiResponse::success(MessageExchangeDto {
        user_message: exchange.user_message.into(),
        assistant_message: exchange.assistant_message.into(),
    })))
}

/// POST /conversations/{id}/messages/stream
/// Server-Sent Events: one `chunk` event per piece of the reply
pub async fn stream_message(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let id: ConversationId = parse_id(&id, "conversation")?;
    let replies = state
        .conversation_service()
        .send_message_stream(user.id, id, payload.into())
        .await?;

    let events = replies.map(|item| {
        let event = match item {
            Ok(chunk) => Event::default()
                .event("chunk")
                .json_data(&chunk)
                .unwrap_or_else(|e| error_event(&e.to_string())),
            Err(e) => {
                tracing::warn!(error = %e, "Streamed reply failed");
                error_event(&client_message(&e))
            }
        };
        Ok(event)
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

/// POST /conversations/{id}/messages/regenerate
pub async fn regenerate(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<String>,
    Json(payload): Json<RegenerateRequest>,
) -> Result<Json<ApiResponse<MessageDto>>, ApiError> {
    let id: ConversationId = parse_id(&id, "conversation")?;
    let message_id: MessageId = parse_id(&payload.message_id, "message")?;
    let message = state
        .conversation_service()
        .regenerate(user.id, id, message_id)
        .await?;
    Ok(Json(ApiResponse::success(message.into())))
}

fn error_event(message: &str) -> Event {
    Event::default()
        .event("error")
        .data(serde_json::json!({ "error": message }).to_string())
}

fn client_message(err: &ConversationError) -> String {
    match err {
        ConversationError::Database(_) | ConversationError::Internal(_) => {
            "An internal error occurred".to_string()
        }
        ConversationError::Agent(_) => "Agent service is unavailable".to_string(),
        other => other.to_string(),
    }
}
