//! Domain service for declarative agent definitions.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::agents::AgentResponse;
use crate::db::DefinitionRepoError;
use crate::declarative::LoaderError;
use crate::entities::definitions;

/// Errors specific to definition operations.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("Definition {0} not found")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    /// The YAML is not syntactically valid.
    #[error("{message}")]
    InvalidYaml {
        message: String,
        line: Option<usize>,
        column: Option<usize>,
    },

    /// Well-formed YAML that the loader or repository refused.
    #[error("{0}")]
    Rejected(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<LoaderError> for DefinitionError {
    fn from(err: LoaderError) -> Self {
        Self::Rejected(err.to_string())
    }
}

impl From<DefinitionRepoError> for DefinitionError {
    fn from(err: DefinitionRepoError) -> Self {
        match err {
            DefinitionRepoError::Rejected(msg) => Self::Rejected(msg),
            DefinitionRepoError::Database(e) => Self::Database(e.to_string()),
        }
    }
}

impl From<sea_orm::DbErr> for DefinitionError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for DefinitionError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct CreateDefinition {
    pub name: String,
    pub kind: String,
    pub content_yaml: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DefinitionDto {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub version: i32,
    pub created_by: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl From<definitions::Model> for DefinitionDto {
    fn from(model: definitions::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            kind: model.kind,
            version: model.version,
            created_by: model.created_by,
            created_at: model.created_at,
            content_hash: model.content_hash,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DefinitionPage {
    pub items: Vec<DefinitionDto>,
    pub page: u64,
    pub page_size: u64,
    pub total_count: u64,
    pub total_pages: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub definition_id: String,
    pub version: i32,
    pub execution_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub result: AgentResponse,
}

/// Domain service trait for declarative definitions.
#[async_trait::async_trait]
pub trait DefinitionService: Send + Sync {
    /// Stores a new version of a definition after checking that it loads.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError::InvalidYaml`] for syntax errors and
    /// [`DefinitionError::Rejected`] when the loader or repository refuses it.
    async fn create(
        &self,
        created_by: &str,
        request: CreateDefinition,
    ) -> Result<DefinitionDto, DefinitionError>;

    /// Latest version of every definition name.
    async fn list(&self, page: u64, page_size: u64) -> Result<DefinitionPage, DefinitionError>;

    async fn get(&self, id: &str) -> Result<DefinitionDto, DefinitionError>;

    /// Loads the definition and runs it once against `input`.
    async fn execute(&self, id: &str, input: &str) -> Result<ExecutionResult, DefinitionError>;
}
