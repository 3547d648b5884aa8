use anyhow::{Context, Result};
use sea_orm::sea_query::{Expr, LikeExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use std::collections::HashMap;

use crate::db::{format_timestamp, parse_timestamp};
use crate::domain::{
    AgentConfiguration, Attachment, Conversation, ConversationStatus, Message, MessageContent,
    MessageMetadata,
};
use crate::entities::{conversations, messages, prelude::*};

/// Listing row: conversation header plus its message count.
#[derive(Debug, Clone)]
pub struct ConversationSummaryRow {
    pub conversation: conversations::Model,
    pub message_count: u64,
}

pub struct ConversationRepository {
    conn: DatabaseConnection,
}

impl ConversationRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Persists a conversation header and the messages from `first_new` onwards.
    ///
    /// Inserts the header when it does not exist yet, otherwise updates it.
    pub async fn save(&self, conversation: &Conversation, first_new: usize) -> Result<()> {
        let txn = self.conn.begin().await?;

        let configuration_json = serde_json::to_string(&conversation.configuration)?;
        let header = conversations::ActiveModel {
            id: Set(conversation.id.to_string()),
            user_id: Set(conversation.user_id.to_string()),
            title: Set(conversation.title.clone()),
            status: Set(conversation.status.as_str().to_string()),
            configuration_json: Set(configuration_json),
            total_tokens: Set(i64::try_from(conversation.total_tokens).unwrap_or(i64::MAX)),
            created_at: Set(format_timestamp(conversation.created_at)),
            updated_at: Set(format_timestamp(conversation.updated_at)),
        };

        let exists = Conversations::find_by_id(conversation.id.to_string())
            .one(&txn)
            .await?
            .is_some();

        if exists {
            header.update(&txn).await.context("Failed to update conversation")?;
        } else {
            Conversations::insert(header)
                .exec(&txn)
                .await
                .context("Failed to insert conversation")?;
        }

        let new_messages = conversation
            .messages()
            .iter()
            .enumerate()
            .skip(first_new)
            .map(|(position, message)| message_active_model(message, position))
            .collect::<Result<Vec<_>>>()?;

        if !new_messages.is_empty() {
            Messages::insert_many(new_messages)
                .exec(&txn)
                .await
                .context("Failed to insert messages")?;
        }

        txn.commit().await?;
        Ok(())
    }

    /// Loads the aggregate with its messages in order. Deleted conversations are returned too.
    pub async fn load(&self, id: &str) -> Result<Option<Conversation>> {
        let Some(header) = Conversations::find_by_id(id.to_string())
            .one(&self.conn)
            .await
            .context("Failed to query conversation")?
        else {
            return Ok(None);
        };

        let rows = Messages::find()
            .filter(messages::Column::ConversationId.eq(id))
            .order_by_asc(messages::Column::Position)
            .all(&self.conn)
            .await
            .context("Failed to query messages")?;

        Ok(Some(to_domain(header, rows)?))
    }

    /// Pages through a user's non-deleted conversations, newest activity first.
    pub async fn list_for_user(
        &self,
        user_id: &str,
        title_filter: Option<&str>,
        page: u64,
        page_size: u64,
    ) -> Result<(Vec<ConversationSummaryRow>, u64)> {
        let mut query = Conversations::find()
            .filter(conversations::Column::UserId.eq(user_id))
            .filter(conversations::Column::Status.ne(ConversationStatus::Deleted.as_str()));

        if let Some(filter) = title_filter.map(str::trim).filter(|f| !f.is_empty()) {
            query = query
                .filter(Expr::col(conversations::Column::Title).like(contains_pattern(filter)));
        }

        let paginator = query
            .order_by_desc(conversations::Column::UpdatedAt)
            .order_by_desc(conversations::Column::Id)
            .paginate(&self.conn, page_size);

        let total = paginator.num_items().await?;
        let headers = paginator.fetch_page(page.saturating_sub(1)).await?;

        let ids: Vec<String> = headers.iter().map(|c| c.id.clone()).collect();
        let counts: HashMap<String, i64> = if ids.is_empty() {
            HashMap::new()
        } else {
            Messages::find()
                .select_only()
                .column(messages::Column::ConversationId)
                .column_as(messages::Column::Id.count(), "message_count")
                .filter(messages::Column::ConversationId.is_in(ids))
                .group_by(messages::Column::ConversationId)
                .into_tuple::<(String, i64)>()
                .all(&self.conn)
                .await
                .context("Failed to count messages")?
                .into_iter()
                .collect()
        };

        let rows = headers
            .into_iter()
            .map(|conversation| {
                let message_count = counts
                    .get(&conversation.id)
                    .copied()
                    .map_or(0, |c| u64::try_from(c).unwrap_or(0));
                ConversationSummaryRow {
                    conversation,
                    message_count,
                }
            })
            .collect();

        Ok((rows, total))
    }
}

/// `%needle%` with the LIKE wildcards inside `needle` matched literally.
fn contains_pattern(needle: &str) -> LikeExpr {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    LikeExpr::new(pattern).escape('\\')
}

fn message_active_model(message: &Message, position: usize) -> Result<messages::ActiveModel> {
    Ok(messages::ActiveModel {
        id: Set(message.id.to_string()),
        conversation_id: Set(message.conversation_id.to_string()),
        position: Set(i32::try_from(position).context("Conversation has too many messages")?),
        role: Set(message.role.as_str().to_string()),
        content_text: Set(message.content.text().to_string()),
        attachments_json: Set(serde_json::to_string(message.content.attachments())?),
        metadata_json: Set(message
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?),
        parent_message_id: Set(message.parent_message_id.map(|id| id.to_string())),
        created_at: Set(format_timestamp(message.created_at)),
    })
}

fn to_domain(header: conversations::Model, rows: Vec<messages::Model>) -> Result<Conversation> {
    let messages = rows
        .into_iter()
        .map(|row| {
            let attachments: Vec<Attachment> = serde_json::from_str(&row.attachments_json)
                .context("Invalid attachments JSON")?;
            let metadata: Option<MessageMetadata> = row
                .metadata_json
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .context("Invalid message metadata JSON")?;

            Ok(Message {
                id: row.id.parse().context("Invalid message id")?,
                conversation_id: row.conversation_id.parse().context("Invalid conversation id")?,
                role: row.role.parse()?,
                content: MessageContent::new(row.content_text, attachments)?,
                created_at: parse_timestamp(&row.created_at)?,
                parent_message_id: row
                    .parent_message_id
                    .as_deref()
                    .map(str::parse)
                    .transpose()
                    .context("Invalid parent message id")?,
                metadata,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let configuration: AgentConfiguration =
        serde_json::from_str(&header.configuration_json).context("Invalid configuration JSON")?;

    Ok(Conversation::restore(
        header.id.parse().context("Invalid conversation id")?,
        header.user_id.parse().context("Invalid user id")?,
        header.title,
        parse_timestamp(&header.created_at)?,
        parse_timestamp(&header.updated_at)?,
        header.status.parse()?,
        configuration,
        u64::try_from(header.total_tokens).unwrap_or(0),
        messages,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::domain::{MessageRole, UserId};

    fn text(s: &str) -> MessageContent {
        MessageContent::from_text(s).unwrap()
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let store = Store::new("sqlite::memory:").await.unwrap();
        let repo = store.conversation_repo();

        let mut conversation = Conversation::create(UserId::new_v4(), Some("Hello".into()), None);
        repo.save(&conversation, 0).await.unwrap();

        let first_new = conversation.messages().len();
        conversation.add_message(MessageRole::User, text("question"));
        conversation.add_message(MessageRole::Assistant, text("answer"));
        conversation.add_tokens(12);
        repo.save(&conversation, first_new).await.unwrap();

        let loaded = repo.load(&conversation.id.to_string()).await.unwrap().unwrap();
        assert_eq!(loaded.title, "Hello");
        assert_eq!(loaded.total_tokens, 12);
        assert_eq!(loaded.messages().len(), 2);
        assert_eq!(loaded.messages()[0].content.text(), "question");
        assert_eq!(
            loaded.messages()[1].parent_message_id,
            Some(loaded.messages()[0].id)
        );
    }

    #[tokio::test]
    async fn test_list_excludes_deleted_and_filters_title() {
        let store = Store::new("sqlite::memory:").await.unwrap();
        let repo = store.conversation_repo();
        let user = UserId::new_v4();

        let mut keep = Conversation::create(user, Some("Rust questions".into()), None);
        keep.add_message(MessageRole::User, text("hi"));
        repo.save(&keep, 0).await.unwrap();

        let mut gone = Conversation::create(user, Some("Rust trash".into()), None);
        repo.save(&gone, 0).await.unwrap();
        gone.mark_deleted();
        repo.save(&gone, 0).await.unwrap();

        let other = Conversation::create(UserId::new_v4(), Some("Rust other".into()), None);
        repo.save(&other, 0).await.unwrap();

        let (rows, total) = repo
            .list_for_user(&user.to_string(), None, 1, 20)
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].conversation.title, "Rust questions");
        assert_eq!(rows[0].message_count, 1);

        let (rows, total) = repo
            .list_for_user(&user.to_string(), Some("trash"), 1, 20)
            .await
            .unwrap();
        assert_eq!(total, 0);
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_title_filter_treats_wildcards_literally() {
        let store = Store::new("sqlite::memory:").await.unwrap();
        let repo = store.conversation_repo();
        let user = UserId::new_v4();

        repo.save(&Conversation::create(user, Some("Trip planning".into()), None), 0)
            .await
            .unwrap();
        repo.save(&Conversation::create(user, Some("Save 50% now".into()), None), 0)
            .await
            .unwrap();

        let user = user.to_string();

        let (_, total) = repo.list_for_user(&user, Some("%"), 1, 20).await.unwrap();
        assert_eq!(total, 1);

        let (rows, total) = repo.list_for_user(&user, Some("50%"), 1, 20).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].conversation.title, "Save 50% now");

        let (_, total) = repo.list_for_user(&user, Some("T_ip"), 1, 20).await.unwrap();
        assert_eq!(total, 0);

        let (_, total) = repo.list_for_user(&user, Some("\\"), 1, 20).await.unwrap();
        assert_eq!(total, 0);

        let (rows, total) = repo.list_for_user(&user, Some("trip"), 1, 20).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].conversation.title, "Trip planning");
    }
}
