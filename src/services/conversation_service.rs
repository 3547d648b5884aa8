//! Domain service for conversations and their messages.
//!
//! Every operation is scoped to the calling user; conversations owned by
//! someone else are reported as forbidden.

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::Serialize;
use thiserror::Error;

use crate::agents::AgentError;
use crate::db::ConversationSummaryRow;
use crate::domain::{
    AgentConfiguration, Attachment, Conversation, ConversationId, DomainError, Message, MessageId,
    UserId,
};

pub const MAX_CREATE_TITLE_LENGTH: usize = 500;
pub const MAX_UPDATE_TITLE_LENGTH: usize = 200;
pub const MAX_MESSAGE_LENGTH: usize = 32_000;
pub const MAX_TOKENS_LIMIT: u32 = 128_000;

/// Errors specific to conversation operations.
#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("Conversation {0} not found")]
    NotFound(ConversationId),

    #[error("Message {0} not found")]
    MessageNotFound(MessageId),

    #[error("{0}")]
    Forbidden(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<DomainError> for ConversationError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(msg) => Self::Validation(msg),
            DomainError::Forbidden(msg) => Self::Forbidden(msg),
            DomainError::NotFound(msg) => Self::Internal(msg),
        }
    }
}

impl From<AgentError> for ConversationError {
    fn from(err: AgentError) -> Self {
        Self::Agent(err.to_string())
    }
}

impl From<sea_orm::DbErr> for ConversationError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for ConversationError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateConversation {
    pub title: Option<String>,
    pub configuration: Option<AgentConfiguration>,
}

#[derive(Debug, Clone, Default)]
pub struct SendMessage {
    pub content: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub status: String,
    pub message_count: u64,
    pub total_tokens: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl From<ConversationSummaryRow> for ConversationSummary {
    fn from(row: ConversationSummaryRow) -> Self {
        let c = row.conversation;
        Self {
            id: c.id,
            title: c.title,
            status: c.status,
            message_count: row.message_count,
            total_tokens: c.total_tokens,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationPage {
    pub items: Vec<ConversationSummary>,
    pub page: u64,
    pub page_size: u64,
    pub total_count: u64,
    pub total_pages: u64,
}

impl ConversationPage {
    #[must_use]
    pub fn new(items: Vec<ConversationSummary>, page: u64, page_size: u64, total_count: u64) -> Self {
        Self {
            items,
            page,
            page_size,
            total_count,
            total_pages: total_count.div_ceil(page_size.max(1)),
        }
    }
}

/// The user message and the assistant reply produced for it.
#[derive(Debug, Clone)]
pub struct MessageExchange {
    pub user_message: Message,
    pub assistant_message: Message,
}

/// One server-sent piece of a streamed reply. The final chunk has empty text
/// and carries the id of the persisted assistant message.
#[derive(Debug, Clone, Serialize)]
pub struct StreamChunk {
    pub chunk_id: u64,
    pub text: String,
    pub is_final: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
}

pub type ReplyStream = BoxStream<'static, Result<StreamChunk, ConversationError>>;

/// Domain service trait for conversations.
#[async_trait::async_trait]
pub trait ConversationService: Send + Sync {
    async fn create(
        &self,
        user_id: UserId,
        request: CreateConversation,
    ) -> Result<Conversation, ConversationError>;

    /// # Errors
    ///
    /// Returns [`ConversationError::NotFound`] for unknown or deleted
    /// conversations and [`ConversationError::Forbidden`] for foreign ones.
    async fn get(&self, user_id: UserId, id: ConversationId)
    -> Result<Conversation, ConversationError>;

    async fn list(
        &self,
        user_id: UserId,
        page: u64,
        page_size: u64,
    ) -> Result<ConversationPage, ConversationError>;

    /// Lists conversations whose title contains `query`.
    async fn search(
        &self,
        user_id: UserId,
        query: &str,
        page: u64,
        page_size: u64,
    ) -> Result<ConversationPage, ConversationError>;

    async fn update_title(
        &self,
        user_id: UserId,
        id: ConversationId,
        title: &str,
    ) -> Result<Conversation, ConversationError>;

    async fn archive(&self, user_id: UserId, id: ConversationId) -> Result<(), ConversationError>;

    /// Soft delete. The conversation disappears from listings and lookups.
    async fn delete(&self, user_id: UserId, id: ConversationId) -> Result<(), ConversationError>;

    async fn list_messages(
        &self,
        user_id: UserId,
        id: ConversationId,
    ) -> Result<Vec<Message>, ConversationError>;

    /// Appends the user message, runs the agent and appends its reply.
    ///
    /// The user message is persisted before the agent runs and is kept when
    /// the agent fails.
    async fn send_message(
        &self,
        user_id: UserId,
        id: ConversationId,
        request: SendMessage,
    ) -> Result<MessageExchange, ConversationError>;

    /// Like [`ConversationService::send_message`] but yields the reply as it
    /// is generated. The assistant message is persisted when the stream ends.
    async fn send_message_stream(
        &self,
        user_id: UserId,
        id: ConversationId,
        request: SendMessage,
    ) -> Result<ReplyStream, ConversationError>;

    /// Produces a new reply for the history preceding an assistant message.
    async fn regenerate(
        &self,
        user_id: UserId,
        id: ConversationId,
        message_id: MessageId,
    ) -> Result<Message, ConversationError>;
}
