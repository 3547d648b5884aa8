use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{
    AgentConfiguration, ConversationId, ConversationStatus, DomainError, MessageContent,
    MessageId, MessageMetadata, MessageRole, UserId,
};

pub const DEFAULT_TITLE: &str = "New Conversation";

/// Events raised by the aggregate and drained by the service after persisting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationEvent {
    ConversationCreated {
        conversation_id: ConversationId,
        user_id: UserId,
    },
    MessageAdded {
        conversation_id: ConversationId,
        message_id: MessageId,
        role: MessageRole,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub role: MessageRole,
    pub content: MessageContent,
    pub created_at: DateTime<Utc>,
    pub parent_message_id: Option<MessageId>,
    pub metadata: Option<MessageMetadata>,
}

impl Message {
    pub fn set_metadata(&mut self, metadata: MessageMetadata) {
        self.metadata = Some(metadata);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub id: ConversationId,
    pub user_id: UserId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: ConversationStatus,
    pub configuration: AgentConfiguration,
    pub total_tokens: u64,
    messages: Vec<Message>,
    events: Vec<ConversationEvent>,
}

impl Conversation {
    #[must_use]
    pub fn create(
        user_id: UserId,
        title: Option<String>,
        configuration: Option<AgentConfiguration>,
    ) -> Self {
        let now = Utc::now();
        let id = ConversationId::new_v4();
        let title = title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_TITLE.to_string());

        Self {
            id,
            user_id,
            title,
            created_at: now,
            updated_at: now,
            status: ConversationStatus::Active,
            configuration: configuration.unwrap_or_default(),
            total_tokens: 0,
            messages: Vec::new(),
            events: vec![ConversationEvent::ConversationCreated {
                conversation_id: id,
                user_id,
            }],
        }
    }

    /// Rebuilds an aggregate from persisted state. Raises no events.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn restore(
        id: ConversationId,
        user_id: UserId,
        title: String,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
        status: ConversationStatus,
        configuration: AgentConfiguration,
        total_tokens: u64,
        messages: Vec<Message>,
    ) -> Self {
        Self {
            id,
            user_id,
            title,
            created_at,
            updated_at,
            status,
            configuration,
            total_tokens,
            messages,
            events: Vec::new(),
        }
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Appends a message whose parent is the current last message.
    pub fn add_message(&mut self, role: MessageRole, content: MessageContent) -> &mut Message {
        let now = Utc::now();
        let message = Message {
            id: MessageId::new_v4(),
            conversation_id: self.id,
            role,
            content,
            created_at: now,
            parent_message_id: self.messages.last().map(|m| m.id),
            metadata: None,
        };

        self.events.push(ConversationEvent::MessageAdded {
            conversation_id: self.id,
            message_id: message.id,
            role,
        });
        self.updated_at = now;
        self.messages.push(message);

        let index = self.messages.len() - 1;
        &mut self.messages[index]
    }

    pub fn update_title(&mut self, title: &str) -> Result<(), DomainError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(DomainError::Validation("Title cannot be empty".to_string()));
        }
        self.title = title.to_string();
        self.updated_at = Utc::now();
        Ok(())
    }

    #[must_use]
    pub fn get_message(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn ensure_ownership(&self, user_id: UserId) -> Result<(), DomainError> {
        if self.user_id != user_id {
            return Err(DomainError::Forbidden(
                "You do not have access to this conversation".to_string(),
            ));
        }
        Ok(())
    }

    pub const fn add_tokens(&mut self, tokens: u64) {
        self.total_tokens = self.total_tokens.saturating_add(tokens);
    }

    pub fn archive(&mut self) {
        self.status = ConversationStatus::Archived;
        self.updated_at = Utc::now();
    }

    pub fn mark_deleted(&mut self) {
        self.status = ConversationStatus::Deleted;
        self.updated_at = Utc::now();
    }

    /// Messages strictly before `id`, or `None` if `id` is not in this conversation.
    #[must_use]
    pub fn history_before(&self, id: MessageId) -> Option<&[Message]> {
        let index = self.messages.iter().position(|m| m.id == id)?;
        Some(&self.messages[..index])
    }

    pub fn take_events(&mut self) -> Vec<ConversationEvent> {
        std::mem::take(&mut self.events)
    }
}
