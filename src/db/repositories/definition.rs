use anyhow::Context;
use chrono::Utc;
use regex::Regex;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use thiserror::Error;

use crate::db::format_timestamp;
use crate::entities::{definitions, prelude::*};

#[derive(Debug, Error)]
pub enum DefinitionRepoError {
    /// The definition was refused before reaching the database.
    #[error("{0}")]
    Rejected(String),

    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

impl From<sea_orm::DbErr> for DefinitionRepoError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.into())
    }
}

#[derive(Debug, Clone)]
pub struct NewDefinition {
    pub name: String,
    pub kind: String,
    /// Values `<= 0` are replaced with the next free version for `name`.
    pub version: i32,
    pub content_yaml: String,
    pub created_by: String,
    pub content_hash: Option<String>,
}

fn raw_secret_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)^[\s-]*?(api[_-]?key|apikey|password|secret)\s*:\s*(.+)$")
            .expect("Invalid regex")
    })
}

/// Rejects YAML carrying literal secret values. `=Secret.` and `=Env.` placeholders pass.
pub fn check_for_raw_secrets(content: &str) -> Result<(), DefinitionRepoError> {
    for caps in raw_secret_regex().captures_iter(content) {
        let Some(value) = caps.get(2).map(|m| m.as_str().trim()) else {
            continue;
        };

        if value.is_empty() {
            continue;
        }

        let lowered = value.to_ascii_lowercase();
        if lowered.starts_with("=secret.") || lowered.starts_with("=env.") {
            continue;
        }

        return Err(DefinitionRepoError::Rejected(
            "Definition contains raw secret values which are not allowed. \
             Use placeholders like =Secret.<Name> or =Env.<Name> instead."
                .to_string(),
        ));
    }

    Ok(())
}

/// Lowercase hex SHA-256 of the YAML text.
#[must_use]
pub fn content_hash(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

fn require(value: &str, field: &str) -> Result<(), DefinitionRepoError> {
    if value.trim().is_empty() {
        return Err(DefinitionRepoError::Rejected(format!(
            "Definition {field} is required"
        )));
    }
    Ok(())
}

pub struct DefinitionRepository {
    conn: DatabaseConnection,
}

impl DefinitionRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn create(
        &self,
        definition: NewDefinition,
    ) -> Result<definitions::Model, DefinitionRepoError> {
        require(&definition.name, "name")?;
        require(&definition.kind, "kind")?;
        require(&definition.content_yaml, "content")?;
        require(&definition.created_by, "created_by")?;
        check_for_raw_secrets(&definition.content_yaml)?;

        let version = if definition.version <= 0 {
            self.next_version(&definition.name).await?
        } else {
            definition.version
        };

        let hash = definition
            .content_hash
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| content_hash(&definition.content_yaml));

        let model = definitions::ActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            name: Set(definition.name),
            kind: Set(definition.kind),
            version: Set(version),
            content_yaml: Set(definition.content_yaml),
            created_by: Set(definition.created_by),
            created_at: Set(format_timestamp(Utc::now())),
            content_hash: Set(Some(hash)),
        };

        let inserted = Definitions::insert(model)
            .exec_with_returning(&self.conn)
            .await
            .context("Failed to insert definition")?;

        Ok(inserted)
    }

    pub async fn latest_by_name(&self, name: &str) -> anyhow::Result<Option<definitions::Model>> {
        Definitions::find()
            .filter(definitions::Column::Name.eq(name))
            .order_by_desc(definitions::Column::Version)
            .one(&self.conn)
            .await
            .context("Failed to query latest definition")
    }

    pub async fn get_by_id(&self, id: &str) -> anyhow::Result<Option<definitions::Model>> {
        Definitions::find_by_id(id.to_string())
            .one(&self.conn)
            .await
            .context("Failed to query definition by ID")
    }

    /// Latest version of each name, ordered by name, one page at a time.
    pub async fn list_latest(
        &self,
        page: u64,
        page_size: u64,
    ) -> anyhow::Result<(Vec<definitions::Model>, u64)> {
        let keys = Definitions::find()
            .select_only()
            .column(definitions::Column::Name)
            .column_as(definitions::Column::Version.max(), "max_version")
            .group_by(definitions::Column::Name)
            .order_by_asc(definitions::Column::Name)
            .into_tuple::<(String, i32)>()
            .paginate(&self.conn, page_size.max(1));

        let total = keys
            .num_items()
            .await
            .context("Failed to count definitions")?;
        let keys = keys
            .fetch_page(page.saturating_sub(1))
            .await
            .context("Failed to list definition versions")?;

        if keys.is_empty() {
            return Ok((Vec::new(), total));
        }

        let latest = keys
            .into_iter()
            .fold(Condition::any(), |cond, (name, version)| {
                cond.add(
                    definitions::Column::Name
                        .eq(name)
                        .and(definitions::Column::Version.eq(version)),
                )
            });

        let rows = Definitions::find()
            .filter(latest)
            .order_by_asc(definitions::Column::Name)
            .all(&self.conn)
            .await
            .context("Failed to list definitions")?;

        Ok((rows, total))
    }

    pub async fn next_version(&self, name: &str) -> anyhow::Result<i32> {
        let max: Option<Option<i32>> = Definitions::find()
            .select_only()
            .column_as(definitions::Column::Version.max(), "max_version")
            .filter(definitions::Column::Name.eq(name))
            .into_tuple()
            .one(&self.conn)
            .await
            .context("Failed to query next definition version")?;

        Ok(max.flatten().map_or(1, |v| v + 1))
    }

    /// Replaces the YAML of an existing row and recomputes its hash.
    pub async fn update(
        &self,
        id: &str,
        kind: &str,
        content_yaml: &str,
    ) -> Result<definitions::Model, DefinitionRepoError> {
        require(kind, "kind")?;
        require(content_yaml, "content")?;
        check_for_raw_secrets(content_yaml)?;

        let updated = definitions::ActiveModel {
            id: Set(id.to_string()),
            kind: Set(kind.to_string()),
            content_yaml: Set(content_yaml.to_string()),
            content_hash: Set(Some(content_hash(content_yaml))),
            ..Default::default()
        }
        .update(&self.conn)
        .await
        .context("Failed to update definition")?;

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;

    fn new_def(name: &str, content: &str) -> NewDefinition {
        NewDefinition {
            name: name.to_string(),
            kind: "Prompt".to_string(),
            version: 0,
            content_yaml: content.to_string(),
            created_by: "tester".to_string(),
            content_hash: None,
        }
    }

    #[test]
    fn test_raw_secret_detection() {
        assert!(check_for_raw_secrets("name: a\napi_key: sk-123\n").is_err());
        assert!(check_for_raw_secrets("  - Password: hunter2").is_err());
        assert!(check_for_raw_secrets("apiKey: =Secret.OpenAi\nsecret: =env.TOKEN").is_ok());
        assert!(check_for_raw_secrets("name: a\ninstructions: keep secrets safe").is_ok());
    }

    #[test]
    fn test_content_hash_is_lowercase_sha256() {
        assert_eq!(
            content_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_versions_increment_per_name() {
        let store = Store::new("sqlite::memory:").await.unwrap();
        let repo = store.definition_repo();

        let v1 = repo.create(new_def("helper", "type: openai\nname: helper")).await.unwrap();
        let v2 = repo.create(new_def("helper", "type: openai\nname: helper\n")).await.unwrap();
        repo.create(new_def("other", "type: openai\nname: other")).await.unwrap();

        assert_eq!(v1.version, 1);
        assert_eq!(v2.version, 2);
        assert_eq!(repo.next_version("helper").await.unwrap(), 3);
        assert_eq!(repo.next_version("missing").await.unwrap(), 1);

        let latest = repo.latest_by_name("helper").await.unwrap().unwrap();
        assert_eq!(latest.id, v2.id);

        let (page, total) = repo.list_latest(1, 10).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].version, 2);
    }

    #[tokio::test]
    async fn test_list_latest_pages_by_name() {
        let store = Store::new("sqlite::memory:").await.unwrap();
        let repo = store.definition_repo();

        for name in ["charlie", "alpha", "bravo"] {
            repo.create(new_def(name, &format!("type: openai\nname: {name}")))
                .await
                .unwrap();
        }
        repo.create(new_def("alpha", "type: openai\nname: alpha\n"))
            .await
            .unwrap();
        repo.create(new_def("alpha", "type: openai\nname: alpha\n\n"))
            .await
            .unwrap();

        let (first, total) = repo.list_latest(1, 2).await.unwrap();
        assert_eq!(total, 3);
        let names: Vec<_> = first.iter().map(|d| (d.name.as_str(), d.version)).collect();
        assert_eq!(names, [("alpha", 3), ("bravo", 1)]);

        let (second, total) = repo.list_latest(2, 2).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].name, "charlie");

        let (past_end, _) = repo.list_latest(3, 2).await.unwrap();
        assert!(past_end.is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_missing_fields_and_secrets() {
        let store = Store::new("sqlite::memory:").await.unwrap();
        let repo = store.definition_repo();

        let err = repo.create(new_def(" ", "type: x")).await.unwrap_err();
        assert!(matches!(err, DefinitionRepoError::Rejected(_)));

        let err = repo
            .create(new_def("leaky", "type: openai\npassword: hunter2"))
            .await
            .unwrap_err();
        assert!(matches!(err, DefinitionRepoError::Rejected(_)));
    }
}
