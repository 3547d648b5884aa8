//! `SeaORM` implementation of the `AuthService` trait.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::{NewRefreshToken, RotateOutcome, Store, User};
use crate::security::{AccessSubject, TokenService};
use crate::services::auth_service::{AuthError, AuthService, IssuedTokens, UserInfo};

pub struct SeaOrmAuthService {
    store: Store,
    tokens: Arc<TokenService>,
    min_password_length: usize,
}

impl SeaOrmAuthService {
    #[must_use]
    pub const fn new(store: Store, tokens: Arc<TokenService>, min_password_length: usize) -> Self {
        Self {
            store,
            tokens,
            min_password_length,
        }
    }

    fn issue_access(&self, user: &User) -> Result<(String, chrono::DateTime<Utc>), AuthError> {
        let subject = AccessSubject {
            id: user.id.clone(),
            name: user.display_name().to_string(),
            roles: user.roles.clone(),
        };
        let access = self.tokens.create_access_token(&subject, None)?;
        Ok((access.token, access.expires_at))
    }

    async fn revoke_family(&self, user_id: &str) -> Result<(), AuthError> {
        let revoked = self
            .store
            .refresh_token_repo()
            .revoke_all_for_user(user_id)
            .await?;
        warn!(user_id = %user_id, revoked, "Refresh token replay detected, revoked all tokens");
        Ok(())
    }
}

#[async_trait]
impl AuthService for SeaOrmAuthService {
    async fn register(
        &self,
        username: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<UserInfo, AuthError> {
        let username = username.trim();
        if username.is_empty() || password.trim().is_empty() {
            return Err(AuthError::Validation(
                "Username and password are required".to_string(),
            ));
        }

        if password.chars().count() < self.min_password_length {
            return Err(AuthError::Validation(format!(
                "Password must be at least {} characters",
                self.min_password_length
            )));
        }

        let users = self.store.user_repo();
        if users.exists(username).await? {
            return Err(AuthError::Conflict("Username already exists".to_string()));
        }

        let name = name.map(str::trim).filter(|n| !n.is_empty());
        let user = users.create(username, password, name, &[]).await?;

        info!(user_id = %user.id, username = %user.username, "User registered");
        Ok(UserInfo::from(user))
    }

    async fn login(
        &self,
        username: &str,
        password: &str,
        device_fingerprint: Option<&str>,
    ) -> Result<IssuedTokens, AuthError> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(AuthError::Validation(
                "Username and password are required".to_string(),
            ));
        }

        let user = self
            .store
            .user_repo()
            .verify_password(username.trim(), password)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let (access_token, access_expires_at) = self.issue_access(&user)?;
        let refresh = self.tokens.create_refresh_token();

        self.store
            .refresh_token_repo()
            .insert(&NewRefreshToken {
                user_id: user.id.clone(),
                token_hash: self.tokens.hash_refresh_token(&refresh.token),
                expires_at: refresh.expires_at,
                device_fingerprint: device_fingerprint.map(str::to_string),
            })
            .await?;

        info!(user_id = %user.id, "Login issued refresh token");

        Ok(IssuedTokens {
            access_token,
            access_expires_at,
            refresh_token: refresh.token,
            refresh_expires_at: refresh.expires_at,
            user: UserInfo::from(user),
        })
    }

    async fn refresh(&self, presented: &str) -> Result<IssuedTokens, AuthError> {
        let repo = self.store.refresh_token_repo();
        let hash = self.tokens.hash_refresh_token(presented);

        let Some(record) = repo.find_by_hash(&hash).await? else {
            warn!("Refresh token not found");
            return Err(AuthError::InvalidRefreshToken);
        };

        if record.is_rotated() {
            self.revoke_family(&record.user_id).await?;
            return Err(AuthError::InvalidRefreshToken);
        }

        if !record.is_active(Utc::now()) {
            warn!(token_id = %record.id, user_id = %record.user_id, "Refresh token expired or revoked");
            return Err(AuthError::InvalidRefreshToken);
        }

        let Some(user) = self.store.user_repo().get_by_id(&record.user_id).await? else {
            warn!(user_id = %record.user_id, "Refresh token owner no longer exists");
            return Err(AuthError::InvalidRefreshToken);
        };

        let refresh = self.tokens.create_refresh_token();
        let replacement = NewRefreshToken {
            user_id: user.id.clone(),
            token_hash: self.tokens.hash_refresh_token(&refresh.token),
            expires_at: refresh.expires_at,
            device_fingerprint: record.device_fingerprint.clone(),
        };

        match repo.rotate(&record.id, &replacement).await? {
            RotateOutcome::Rotated(_) => {}
            RotateOutcome::AlreadyConsumed => {
                self.revoke_family(&record.user_id).await?;
                return Err(AuthError::InvalidRefreshToken);
            }
        }

        let (access_token, access_expires_at) = self.issue_access(&user)?;

        Ok(IssuedTokens {
            access_token,
            access_expires_at,
            refresh_token: refresh.token,
            refresh_expires_at: refresh.expires_at,
            user: UserInfo::from(user),
        })
    }

    async fn logout(&self, presented: Option<&str>) -> Result<(), AuthError> {
        let Some(presented) = presented.filter(|t| !t.is_empty()) else {
            return Ok(());
        };

        let repo = self.store.refresh_token_repo();
        let hash = self.tokens.hash_refresh_token(presented);
        if let Some(record) = repo.find_by_hash(&hash).await?
            && repo.revoke(&record.id).await?
        {
            info!(token_id = %record.id, user_id = %record.user_id, "Logout revoked refresh token");
        }

        Ok(())
    }

    async fn get_user_info(&self, user_id: &str) -> Result<UserInfo, AuthError> {
        self.store
            .user_repo()
            .get_by_id(user_id)
            .await?
            .map(UserInfo::from)
            .ok_or(AuthError::UserNotFound)
    }
}
