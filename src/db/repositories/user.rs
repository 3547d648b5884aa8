use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, Set};
use tokio::task;

use crate::db::format_timestamp;
use crate::entities::{prelude::*, users};
use crate::security::PasswordHasher;

/// User data returned from repository (without hash or salt)
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub username: String,
    pub name: Option<String>,
    pub roles: Vec<String>,
    pub created_at: String,
}

impl User {
    /// Name shown in tokens: the display name, falling back to the username.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.username)
    }
}

impl From<users::Model> for User {
    fn from(model: users::Model) -> Self {
        Self {
            id: model.id,
            username: model.username,
            name: model.name,
            roles: split_roles(model.roles.as_deref()),
            created_at: model.created_at,
        }
    }
}

#[must_use]
pub fn split_roles(roles: Option<&str>) -> Vec<String> {
    roles
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect()
}

pub struct UserRepository {
    conn: DatabaseConnection,
}

impl UserRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn create(
        &self,
        username: &str,
        password: &str,
        name: Option<&str>,
        roles: &[String],
    ) -> Result<User> {
        let password = password.to_string();
        let (hash, salt) = task::spawn_blocking(move || PasswordHasher.create_hash(&password))
            .await
            .context("Password hashing task panicked")??;

        let roles = if roles.is_empty() {
            None
        } else {
            Some(roles.join(","))
        };

        let model = users::ActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            username: Set(username.to_string()),
            password_hash: Set(STANDARD.encode(hash)),
            password_salt: Set(STANDARD.encode(salt)),
            name: Set(name.map(str::to_string)),
            roles: Set(roles),
            created_at: Set(format_timestamp(Utc::now())),
        };

        let inserted = Users::insert(model)
            .exec_with_returning(&self.conn)
            .await
            .context("Failed to insert user")?;

        Ok(User::from(inserted))
    }

    pub async fn exists(&self, username: &str) -> Result<bool> {
        let count = Users::find()
            .filter(users::Column::Username.eq(username))
            .count(&self.conn)
            .await
            .context("Failed to count users by username")?;

        Ok(count > 0)
    }

    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = Users::find()
            .filter(users::Column::Username.eq(username))
            .one(&self.conn)
            .await
            .context("Failed to query user by username")?;

        Ok(user.map(User::from))
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<User>> {
        let user = Users::find_by_id(id.to_string())
            .one(&self.conn)
            .await
            .context("Failed to query user by ID")?;

        Ok(user.map(User::from))
    }

    /// Returns the user when the password matches, `None` for unknown users or bad passwords.
    pub async fn verify_password(&self, username: &str, password: &str) -> Result<Option<User>> {
        let user = Users::find()
            .filter(users::Column::Username.eq(username))
            .one(&self.conn)
            .await
            .context("Failed to query user for password verification")?;

        let Some(user) = user else {
            return Ok(None);
        };

        let hash = STANDARD
            .decode(&user.password_hash)
            .context("Stored password hash is not valid base64")?;
        let salt = STANDARD
            .decode(&user.password_salt)
            .context("Stored password salt is not valid base64")?;
        let password = password.to_string();

        let is_valid =
            task::spawn_blocking(move || PasswordHasher.verify(&password, &hash, &salt))
                .await
                .context("Password verification task panicked")?;

        Ok(is_valid.then(|| User::from(user)))
    }

    pub async fn list(&self) -> Result<Vec<User>> {
        let users = Users::find()
            .all(&self.conn)
            .await
            .context("Failed to list users")?;

        Ok(users.into_iter().map(User::from).collect())
    }
}
