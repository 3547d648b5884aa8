use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub mod migrator;
pub mod repositories;

pub use repositories::conversation::ConversationSummaryRow;
pub use repositories::definition::{DefinitionRepoError, NewDefinition};
pub use repositories::refresh_token::{NewRefreshToken, RefreshTokenRecord, RotateOutcome};
pub use repositories::user::User;

/// Timestamps are stored as fixed-width RFC 3339 strings so that they sort lexically.
#[must_use]
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp: {value}"))
}

#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,
}

impl Store {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 5, 1).await
    }

    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        let in_memory = db_url.contains(":memory:");

        if !in_memory {
            let path_str = db_url.trim_start_matches("sqlite://").trim_start_matches("sqlite:");
            let path_str = path_str.split('?').next().unwrap_or(path_str);
            if let Some(parent) = Path::new(path_str).parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if !Path::new(path_str).exists() {
                std::fs::File::create(path_str)
                    .with_context(|| format!("Failed to create database file: {path_str}"))?;
            }
        }

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .sqlx_logging(false);

        if in_memory {
            // Every SQLite connection to :memory: is its own database.
            opt.max_connections(1).min_connections(1);
        } else {
            opt.max_connections(max_connections)
                .min_connections(min_connections)
                .idle_timeout(Duration::from_secs(300))
                .max_lifetime(Duration::from_secs(600));
        }

        let conn = Database::connect(opt).await?;

        migrator::Migrator::up(&conn, None).await?;

        info!(
            "Database connected & migrations applied (pool: {}-{})",
            min_connections, max_connections
        );

        Ok(Self { conn })
    }

    pub async fn ping(&self) -> Result<()> {
        let backend = self.conn.get_database_backend();
        self.conn
            .query_one(Statement::from_string(backend, "SELECT 1".to_string()))
            .await?;
        Ok(())
    }

    #[must_use]
    pub fn user_repo(&self) -> repositories::user::UserRepository {
        repositories::user::UserRepository::new(self.conn.clone())
    }

    #[must_use]
    pub fn refresh_token_repo(&self) -> repositories::refresh_token::RefreshTokenRepository {
        repositories::refresh_token::RefreshTokenRepository::new(self.conn.clone())
    }

    #[must_use]
    pub fn conversation_repo(&self) -> repositories::conversation::ConversationRepository {
        repositories::conversation::ConversationRepository::new(self.conn.clone())
    }

    #[must_use]
    pub fn definition_repo(&self) -> repositories::definition::DefinitionRepository {
        repositories::definition::DefinitionRepository::new(self.conn.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::SubsecRound;

    #[test]
    fn test_timestamps_sort_lexically() {
        let earlier = Utc::now();
        let later = earlier + chrono::Duration::milliseconds(5);
        let (a, b) = (format_timestamp(earlier), format_timestamp(later));
        assert!(a < b);
        assert_eq!(a.len(), b.len());
        assert_eq!(parse_timestamp(&a).unwrap(), earlier.trunc_subsecs(6));
    }

    #[tokio::test]
    async fn test_in_memory_store_keeps_state_across_queries() {
        let store = Store::new("sqlite::memory:").await.unwrap();
        store.ping().await.unwrap();
        store
            .user_repo()
            .create("alice", "password123", None, &[])
            .await
            .unwrap();
        assert!(store.user_repo().exists("alice").await.unwrap());
    }
}
