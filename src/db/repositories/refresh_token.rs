use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};

use crate::db::{format_timestamp, parse_timestamp};
use crate::entities::{prelude::*, refresh_tokens};

#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    pub id: String,
    pub user_id: String,
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub replaced_by_token_id: Option<String>,
    pub device_fingerprint: Option<String>,
}

impl RefreshTokenRecord {
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }

    #[must_use]
    pub const fn is_rotated(&self) -> bool {
        self.replaced_by_token_id.is_some()
    }
}

impl TryFrom<refresh_tokens::Model> for RefreshTokenRecord {
    type Error = anyhow::Error;

    fn try_from(model: refresh_tokens::Model) -> Result<Self> {
        Ok(Self {
            created_at: parse_timestamp(&model.created_at)?,
            expires_at: parse_timestamp(&model.expires_at)?,
            revoked_at: model
                .revoked_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            id: model.id,
            user_id: model.user_id,
            token_hash: model.token_hash,
            replaced_by_token_id: model.replaced_by_token_id,
            device_fingerprint: model.device_fingerprint,
        })
    }
}

/// Input for a newly minted token row.
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub user_id: String,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub device_fingerprint: Option<String>,
}

#[derive(Debug)]
pub enum RotateOutcome {
    Rotated(RefreshTokenRecord),
    /// The old row was already revoked or replaced when the update ran.
    AlreadyConsumed,
}

pub struct RefreshTokenRepository {
    conn: DatabaseConnection,
}

impl RefreshTokenRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    fn active_model(token: &NewRefreshToken, id: &str, now: DateTime<Utc>) -> refresh_tokens::ActiveModel {
        refresh_tokens::ActiveModel {
            id: Set(id.to_string()),
            user_id: Set(token.user_id.clone()),
            token_hash: Set(token.token_hash.clone()),
            created_at: Set(format_timestamp(now)),
            expires_at: Set(format_timestamp(token.expires_at)),
            revoked_at: Set(None),
            replaced_by_token_id: Set(None),
            device_fingerprint: Set(token.device_fingerprint.clone()),
        }
    }

    pub async fn insert(&self, token: &NewRefreshToken) -> Result<RefreshTokenRecord> {
        let id = uuid::Uuid::new_v4().to_string();
        let model = RefreshTokens::insert(Self::active_model(token, &id, Utc::now()))
            .exec_with_returning(&self.conn)
            .await
            .context("Failed to insert refresh token")?;

        RefreshTokenRecord::try_from(model)
    }

    pub async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>> {
        let model = RefreshTokens::find()
            .filter(refresh_tokens::Column::TokenHash.eq(token_hash))
            .one(&self.conn)
            .await
            .context("Failed to query refresh token by hash")?;

        model.map(RefreshTokenRecord::try_from).transpose()
    }

    /// Revokes `old_id` and inserts its replacement in one transaction.
    ///
    /// The revocation only applies while the old row is still unrevoked and
    /// unreplaced, so of two concurrent rotations of the same token exactly one
    /// succeeds. The other gets [`RotateOutcome::AlreadyConsumed`].
    pub async fn rotate(&self, old_id: &str, replacement: &NewRefreshToken) -> Result<RotateOutcome> {
        let now = Utc::now();
        let new_id = uuid::Uuid::new_v4().to_string();

        let txn = self.conn.begin().await?;

        let result = RefreshTokens::update_many()
            .col_expr(
                refresh_tokens::Column::RevokedAt,
                Expr::value(format_timestamp(now)),
            )
            .col_expr(
                refresh_tokens::Column::ReplacedByTokenId,
                Expr::value(new_id.clone()),
            )
            .filter(refresh_tokens::Column::Id.eq(old_id))
            .filter(refresh_tokens::Column::RevokedAt.is_null())
            .filter(refresh_tokens::Column::ReplacedByTokenId.is_null())
            .exec(&txn)
            .await
            .context("Failed to revoke rotated refresh token")?;

        if result.rows_affected == 0 {
            txn.rollback().await?;
            return Ok(RotateOutcome::AlreadyConsumed);
        }

        let model = RefreshTokens::insert(Self::active_model(replacement, &new_id, now))
            .exec_with_returning(&txn)
            .await
            .context("Failed to insert replacement refresh token")?;

        txn.commit().await?;

        Ok(RotateOutcome::Rotated(RefreshTokenRecord::try_from(model)?))
    }

    /// Revokes a single token without a replacement. Returns whether it was live.
    pub async fn revoke(&self, id: &str) -> Result<bool> {
        let result = RefreshTokens::update_many()
            .col_expr(
                refresh_tokens::Column::RevokedAt,
                Expr::value(format_timestamp(Utc::now())),
            )
            .filter(refresh_tokens::Column::Id.eq(id))
            .filter(refresh_tokens::Column::RevokedAt.is_null())
            .exec(&self.conn)
            .await
            .context("Failed to revoke refresh token")?;

        Ok(result.rows_affected > 0)
    }

    /// Revokes every unrevoked token of a user in one statement.
    pub async fn revoke_all_for_user(&self, user_id: &str) -> Result<u64> {
        let result = RefreshTokens::update_many()
            .col_expr(
                refresh_tokens::Column::RevokedAt,
                Expr::value(format_timestamp(Utc::now())),
            )
            .filter(refresh_tokens::Column::UserId.eq(user_id))
            .filter(refresh_tokens::Column::RevokedAt.is_null())
            .exec(&self.conn)
            .await
            .context("Failed to revoke refresh tokens for user")?;

        Ok(result.rows_affected)
    }

    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<RefreshTokenRecord>> {
        RefreshTokens::find()
            .filter(refresh_tokens::Column::UserId.eq(user_id))
            .order_by_asc(refresh_tokens::Column::CreatedAt)
            .all(&self.conn)
            .await
            .context("Failed to list refresh tokens")?
            .into_iter()
            .map(RefreshTokenRecord::try_from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use chrono::Duration;

    fn new_token(user_id: &str, hash: &str) -> NewRefreshToken {
        NewRefreshToken {
            user_id: user_id.to_string(),
            token_hash: hash.to_string(),
            expires_at: Utc::now() + Duration::days(30),
            device_fingerprint: None,
        }
    }

    #[tokio::test]
    async fn test_rotate_revokes_old_and_inserts_new() {
        let store = Store::new("sqlite::memory:").await.unwrap();
        let repo = store.refresh_token_repo();

        let old = repo.insert(&new_token("u1", "HASH1")).await.unwrap();
        assert!(old.is_active(Utc::now()));

        let RotateOutcome::Rotated(new) = repo.rotate(&old.id, &new_token("u1", "HASH2")).await.unwrap()
        else {
            panic!("expected rotation");
        };

        let old = repo.find_by_hash("HASH1").await.unwrap().unwrap();
        assert!(old.revoked_at.is_some());
        assert_eq!(old.replaced_by_token_id.as_deref(), Some(new.id.as_str()));
        assert!(new.is_active(Utc::now()));
    }

    #[tokio::test]
    async fn test_second_rotation_is_rejected() {
        let store = Store::new("sqlite::memory:").await.unwrap();
        let repo = store.refresh_token_repo();

        let old = repo.insert(&new_token("u1", "HASH1")).await.unwrap();
        repo.rotate(&old.id, &new_token("u1", "HASH2")).await.unwrap();

        let outcome = repo.rotate(&old.id, &new_token("u1", "HASH3")).await.unwrap();
        assert!(matches!(outcome, RotateOutcome::AlreadyConsumed));
        assert!(repo.find_by_hash("HASH3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke_all_for_user() {
        let store = Store::new("sqlite::memory:").await.unwrap();
        let repo = store.refresh_token_repo();

        repo.insert(&new_token("u1", "A")).await.unwrap();
        repo.insert(&new_token("u1", "B")).await.unwrap();
        repo.insert(&new_token("u2", "C")).await.unwrap();

        assert_eq!(repo.revoke_all_for_user("u1").await.unwrap(), 2);
        assert_eq!(repo.revoke_all_for_user("u1").await.unwrap(), 0);

        let now = Utc::now();
        assert!(repo.list_for_user("u1").await.unwrap().iter().all(|t| !t.is_active(now)));
        assert!(repo.find_by_hash("C").await.unwrap().unwrap().is_active(now));
    }
}
