//! Domain types for conversations and their participants.
//!
//! Identifiers are newtypes over [`Uuid`] so that a `ConversationId` can never be
//! passed where a `UserId` is expected.

pub mod conversation;
pub mod events;

pub use conversation::{Conversation, Message};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by aggregate invariants.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[must_use]
            pub fn new_v4() -> Self {
                Self(Uuid::new_v4())
            }

            #[must_use]
            pub const fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            #[must_use]
            pub const fn value(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(
    /// Owner of conversations and refresh tokens.
    UserId
);
uuid_id!(ConversationId);
uuid_id!(MessageId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "tool" => Ok(Self::Tool),
            other => Err(DomainError::Validation(format!("Unknown message role: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    #[default]
    Active,
    Archived,
    Deleted,
}

impl ConversationStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
            Self::Deleted => "deleted",
        }
    }
}

impl FromStr for ConversationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "archived" => Ok(Self::Archived),
            "deleted" => Ok(Self::Deleted),
            other => Err(DomainError::Validation(format!(
                "Unknown conversation status: {other}"
            ))),
        }
    }
}

/// Model parameters a conversation is run with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfiguration {
    pub model_name: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
}

impl Default for AgentConfiguration {
    fn default() -> Self {
        Self {
            model_name: "gpt-4o".to_string(),
            temperature: 0.7,
            max_tokens: 4000,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub storage_key: String,
}

impl Attachment {
    #[must_use]
    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }

    #[must_use]
    pub fn is_document(&self) -> bool {
        self.content_type == "application/pdf"
            || self.content_type.contains("document")
            || self.content_type.contains("text")
    }
}

/// Text and attachments of a message. At least one of the two is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent {
    text: String,
    attachments: Vec<Attachment>,
}

impl MessageContent {
    pub fn new(text: impl Into<String>, attachments: Vec<Attachment>) -> Result<Self, DomainError> {
        let text = text.into();
        if text.trim().is_empty() && attachments.is_empty() {
            return Err(DomainError::Validation(
                "Message must have text or attachments".to_string(),
            ));
        }
        Ok(Self { text, attachments })
    }

    pub fn from_text(text: impl Into<String>) -> Result<Self, DomainError> {
        Self::new(text, Vec::new())
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub arguments: String,
    pub result: Option<String>,
    pub invoked_at: DateTime<Utc>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageMetadata {
    pub tool_invocations: Vec<ToolInvocation>,
    pub agent_name: Option<String>,
    pub model: Option<String>,
    pub token_count: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_round_trips_through_display() {
        let id = ConversationId::new_v4();
        let parsed: ConversationId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<UserId>().is_err());
    }

    #[test]
    fn test_message_content_requires_text_or_attachments() {
        assert!(MessageContent::from_text("   ").is_err());
        assert!(MessageContent::from_text("hello").is_ok());

        let attachment = Attachment {
            file_name: "a.png".to_string(),
            content_type: "image/png".to_string(),
            size_bytes: 3,
            storage_key: "k_a.png".to_string(),
        };
        let content = MessageContent::new("", vec![attachment]).unwrap();
        assert!(content.attachments()[0].is_image());
        assert!(!content.attachments()[0].is_document());
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("Assistant".parse::<MessageRole>().unwrap(), MessageRole::Assistant);
        assert!("robot".parse::<MessageRole>().is_err());
        assert_eq!(MessageRole::Tool.to_string(), "tool");
    }
}
