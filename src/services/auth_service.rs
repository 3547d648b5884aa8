//! Domain service for accounts and token-based sessions.
//!
//! Handles registration, password login, refresh-token rotation and logout.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::db::User;
use crate::security::TokenError;

/// Errors specific to authentication operations.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The presented refresh token is unknown, expired, revoked or replayed.
    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("User not found")]
    UserNotFound,

    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for AuthError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// User info DTO for responses.
#[derive(Debug, Clone, Serialize)]
pub struct UserInfo {
    pub id: String,
    pub username: String,
    pub name: String,
    pub roles: Vec<String>,
    pub created_at: String,
}

impl From<User> for UserInfo {
    fn from(user: User) -> Self {
        Self {
            name: user.display_name().to_string(),
            id: user.id,
            username: user.username,
            roles: user.roles,
            created_at: user.created_at,
        }
    }
}

/// An access token together with the raw refresh token that goes into the cookie.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub access_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
    pub user: UserInfo,
}

/// Domain service trait for authentication.
#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    /// Creates a user account.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Validation`] for blank input or a short password
    /// and [`AuthError::Conflict`] when the username is taken.
    async fn register(
        &self,
        username: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<UserInfo, AuthError>;

    /// Verifies credentials and issues a fresh token pair.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCredentials`] if login fails.
    async fn login(
        &self,
        username: &str,
        password: &str,
        device_fingerprint: Option<&str>,
    ) -> Result<IssuedTokens, AuthError>;

    /// Exchanges a live refresh token for a new pair, revoking the old one.
    ///
    /// Presenting a token that was already rotated revokes every live token
    /// of its owner.
    async fn refresh(&self, presented: &str) -> Result<IssuedTokens, AuthError>;

    /// Revokes the presented refresh token if it is known.
    async fn logout(&self, presented: Option<&str>) -> Result<(), AuthError>;

    /// Gets information for a specific user.
    async fn get_user_info(&self, user_id: &str) -> Result<UserInfo, AuthError>;
}
