use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::fmt;

use super::ApiResponse;
use crate::services::{AuthError, ConversationError, DefinitionError};
use crate::storage::StorageError;
use crate::tools::ToolError;

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),

    Forbidden(String),

    DatabaseError(String),

    ExternalApiError { service: String, message: String },

    ValidationError(String),

    /// A YAML syntax error with its 1-based position.
    YamlSyntax {
        message: String,
        line: Option<usize>,
        column: Option<usize>,
    },

    Unprocessable(String),

    PayloadTooLarge(String),

    Conflict(String),

    InternalError(String),

    Unauthorized(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            ApiError::ExternalApiError { service, message } => {
                write!(f, "{} error: {}", service, message)
            }
            ApiError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            ApiError::YamlSyntax { message, .. } => write!(f, "YAML syntax error: {}", message),
            ApiError::Unprocessable(msg) => write!(f, "Unprocessable: {}", msg),
            ApiError::PayloadTooLarge(msg) => write!(f, "Payload too large: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            ApiError::DatabaseError(msg) => {
                tracing::error!("Database error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "A database error occurred".to_string(),
                )
            }
            ApiError::ExternalApiError { service, message } => {
                tracing::warn!("{} API error: {}", service, message);
                (
                    StatusCode::BAD_GATEWAY,
                    format!("{} service is unavailable", service),
                )
            }
            ApiError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::YamlSyntax {
                message,
                line,
                column,
            } => {
                let body = ApiResponse::<()>::error(message.clone()).with_details(
                    serde_json::json!({ "line": line, "column": column }),
                );
                return (StatusCode::BAD_REQUEST, Json(body)).into_response();
            }
            ApiError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            ApiError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
        };

        let body = ApiResponse::<()>::error(error_message);
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::InternalError(err.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Validation(msg) => Self::validation(msg),
            AuthError::Conflict(msg) => Self::Conflict(msg),
            AuthError::InvalidCredentials => Self::Unauthorized("Invalid credentials".to_string()),
            AuthError::InvalidRefreshToken => {
                Self::Unauthorized("Invalid refresh token".to_string())
            }
            AuthError::UserNotFound => Self::NotFound("User not found".to_string()),
            AuthError::Token(e) => Self::Unauthorized(e.to_string()),
            AuthError::Database(msg) => Self::DatabaseError(msg),
            AuthError::Internal(msg) => Self::internal(msg),
        }
    }
}

impl From<ConversationError> for ApiError {
    fn from(err: ConversationError) -> Self {
        match err {
            ConversationError::NotFound(id) => Self::not_found("Conversation", id),
            ConversationError::MessageNotFound(id) => Self::not_found("Message", id),
            ConversationError::Forbidden(msg) => Self::Forbidden(msg),
            ConversationError::Validation(msg) => Self::validation(msg),
            ConversationError::Agent(message) => Self::agent_error(message),
            ConversationError::Database(msg) => Self::DatabaseError(msg),
            ConversationError::Internal(msg) => Self::internal(msg),
        }
    }
}

impl From<DefinitionError> for ApiError {
    fn from(err: DefinitionError) -> Self {
        match err {
            DefinitionError::NotFound(id) => Self::not_found("Definition", id),
            DefinitionError::Validation(msg) => Self::validation(msg),
            DefinitionError::InvalidYaml {
                message,
                line,
                column,
            } => Self::YamlSyntax {
                message,
                line,
                column,
            },
            DefinitionError::Rejected(msg) => Self::Unprocessable(msg),
            DefinitionError::Agent(message) => Self::agent_error(message),
            DefinitionError::Database(msg) => Self::DatabaseError(msg),
            DefinitionError::Internal(msg) => Self::internal(msg),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidKey(key) => Self::validation(format!("Invalid file key: {key}")),
            StorageError::NotFound(key) => Self::not_found("File", key),
            StorageError::Io(e) => Self::internal(format!("Storage error: {e}")),
        }
    }
}

impl From<ToolError> for ApiError {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::NotFound(name) => Self::NotFound(format!("Tool '{name}' not found")),
            ToolError::InvalidArguments(msg) | ToolError::Execution(msg) => Self::validation(msg),
        }
    }
}

impl ApiError {
    pub fn not_found(resource: &str, id: impl fmt::Display) -> Self {
        ApiError::NotFound(format!("{} {} not found", resource, id))
    }

    pub fn agent_error(msg: impl Into<String>) -> Self {
        ApiError::ExternalApiError {
            service: "Agent".to_string(),
            message: msg.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::ValidationError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError::InternalError(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let cases = [
            (ApiError::not_found("Conversation", "x"), StatusCode::NOT_FOUND),
            (ApiError::Forbidden("no".into()), StatusCode::FORBIDDEN),
            (ApiError::validation("bad"), StatusCode::BAD_REQUEST),
            (ApiError::Unauthorized("who".into()), StatusCode::UNAUTHORIZED),
            (ApiError::Conflict("dup".into()), StatusCode::CONFLICT),
            (ApiError::Unprocessable("no".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (ApiError::PayloadTooLarge("big".into()), StatusCode::PAYLOAD_TOO_LARGE),
            (ApiError::agent_error("down"), StatusCode::BAD_GATEWAY),
            (ApiError::internal("oops"), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }

    #[tokio::test]
    async fn test_internal_errors_are_redacted() {
        let response = ApiError::DatabaseError("table users is locked".into()).into_response();
        let json = body_json(response).await;
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "A database error occurred");
    }

    #[tokio::test]
    async fn test_yaml_syntax_carries_location() {
        let response = ApiError::YamlSyntax {
            message: "did not find expected node".into(),
            line: Some(2),
            column: Some(7),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = body_json(response).await;
        assert_eq!(json["details"]["line"], 2);
        assert_eq!(json["details"]["column"], 7);
    }
}
