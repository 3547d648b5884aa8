//! `SeaORM` implementation of the `ConversationService` trait.

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::agents::{AgentOrchestrator, AgentResponse, ChunkStream, estimate_tokens};
use crate::db::Store;
use crate::domain::conversation::ConversationEvent;
use crate::domain::events::{Envelope, NotificationEvent};
use crate::domain::{
    AgentConfiguration, Conversation, ConversationId, ConversationStatus, Message, MessageContent,
    MessageId, MessageMetadata, MessageRole, UserId,
};
use crate::services::conversation_service::{
    ConversationError, ConversationPage, ConversationService, ConversationSummary,
    CreateConversation, MAX_CREATE_TITLE_LENGTH, MAX_MESSAGE_LENGTH, MAX_TOKENS_LIMIT,
    MAX_UPDATE_TITLE_LENGTH, MessageExchange, ReplyStream, SendMessage, StreamChunk,
};

const PRIMARY_AGENT: &str = "primary";

fn validate_configuration(configuration: &AgentConfiguration) -> Result<(), ConversationError> {
    if !(0.0..=2.0).contains(&configuration.temperature) {
        return Err(ConversationError::Validation(
            "Temperature must be between 0 and 2".to_string(),
        ));
    }
    if !(1..=MAX_TOKENS_LIMIT).contains(&configuration.max_tokens) {
        return Err(ConversationError::Validation(format!(
            "Max tokens must be between 1 and {MAX_TOKENS_LIMIT}"
        )));
    }
    if configuration.model_name.trim().is_empty() {
        return Err(ConversationError::Validation(
            "Model name is required".to_string(),
        ));
    }
    Ok(())
}

fn validate_content(request: SendMessage) -> Result<MessageContent, ConversationError> {
    if request.content.trim().is_empty() {
        return Err(ConversationError::Validation(
            "Message content is required".to_string(),
        ));
    }
    if request.content.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(ConversationError::Validation(format!(
            "Message content must be {MAX_MESSAGE_LENGTH} characters or less"
        )));
    }
    Ok(MessageContent::new(request.content, request.attachments)?)
}

fn reply_content(text: String) -> Result<MessageContent, ConversationError> {
    MessageContent::from_text(text)
        .map_err(|_| ConversationError::Agent("Agent returned an empty response".to_string()))
}

fn to_notification(conversation: &Conversation, event: ConversationEvent) -> NotificationEvent {
    match event {
        ConversationEvent::ConversationCreated {
            conversation_id, ..
        } => NotificationEvent::ConversationCreated {
            conversation_id: conversation_id.to_string(),
            title: conversation.title.clone(),
        },
        ConversationEvent::MessageAdded {
            conversation_id,
            message_id,
            role,
        } => NotificationEvent::MessageAdded {
            conversation_id: conversation_id.to_string(),
            message_id: message_id.to_string(),
            role: role.to_string(),
        },
    }
}

/// Persists new messages and pushes the aggregate's pending events to the bus.
#[derive(Clone)]
struct Persister {
    store: Store,
    event_bus: broadcast::Sender<Envelope>,
}

impl Persister {
    async fn save(
        &self,
        conversation: &mut Conversation,
        first_new: usize,
    ) -> Result<(), ConversationError> {
        self.store
            .conversation_repo()
            .save(conversation, first_new)
            .await?;

        for event in conversation.take_events() {
            let notification = to_notification(conversation, event);
            let _ = self
                .event_bus
                .send(Envelope::for_user(conversation.user_id, notification));
        }
        Ok(())
    }

    /// Appends the assistant reply with its metadata and stores it.
    async fn append_reply(
        &self,
        conversation: &mut Conversation,
        content: String,
        metadata: MessageMetadata,
        tokens: u32,
    ) -> Result<Message, ConversationError> {
        let first_new = conversation.messages().len();
        let content = reply_content(content)?;

        let message = conversation.add_message(MessageRole::Assistant, content);
        message.set_metadata(metadata);
        let message = message.clone();

        conversation.add_tokens(u64::from(tokens));
        self.save(conversation, first_new).await?;
        Ok(message)
    }
}

fn reply_metadata(response: &AgentResponse) -> MessageMetadata {
    MessageMetadata {
        tool_invocations: response.tool_invocations.clone(),
        agent_name: Some(PRIMARY_AGENT.to_string()),
        model: Some(response.model_used.clone()),
        token_count: Some(response.tokens_used),
    }
}

pub struct SeaOrmConversationService {
    persister: Persister,
    orchestrator: Arc<AgentOrchestrator>,
    /// Applied to conversations created without a configuration.
    default_configuration: AgentConfiguration,
}

impl SeaOrmConversationService {
    #[must_use]
    pub fn new(
        store: Store,
        orchestrator: Arc<AgentOrchestrator>,
        event_bus: broadcast::Sender<Envelope>,
        default_configuration: AgentConfiguration,
    ) -> Self {
        Self {
            persister: Persister { store, event_bus },
            orchestrator,
            default_configuration,
        }
    }

    async fn load_owned(
        &self,
        user_id: UserId,
        id: ConversationId,
    ) -> Result<Conversation, ConversationError> {
        let conversation = self
            .persister
            .store
            .conversation_repo()
            .load(&id.to_string())
            .await?
            .filter(|c| c.status != ConversationStatus::Deleted)
            .ok_or(ConversationError::NotFound(id))?;

        conversation.ensure_ownership(user_id)?;
        Ok(conversation)
    }

    async fn page(
        &self,
        user_id: UserId,
        title_filter: Option<&str>,
        page: u64,
        page_size: u64,
    ) -> Result<ConversationPage, ConversationError> {
        let (rows, total) = self
            .persister
            .store
            .conversation_repo()
            .list_for_user(&user_id.to_string(), title_filter, page, page_size)
            .await?;

        let items = rows.into_iter().map(ConversationSummary::from).collect();
        Ok(ConversationPage::new(items, page, page_size, total))
    }

    /// Appends the user message and stores it before any agent call.
    async fn append_user_message(
        &self,
        user_id: UserId,
        id: ConversationId,
        request: SendMessage,
    ) -> Result<(Conversation, Message), ConversationError> {
        let content = validate_content(request)?;
        let mut conversation = self.load_owned(user_id, id).await?;

        let first_new = conversation.messages().len();
        let user_message = conversation.add_message(MessageRole::User, content).clone();
        self.persister.save(&mut conversation, first_new).await?;

        Ok((conversation, user_message))
    }
}

#[async_trait]
impl ConversationService for SeaOrmConversationService {
    async fn create(
        &self,
        user_id: UserId,
        request: CreateConversation,
    ) -> Result<Conversation, ConversationError> {
        if let Some(title) = &request.title
            && title.chars().count() > MAX_CREATE_TITLE_LENGTH
        {
            return Err(ConversationError::Validation(format!(
                "Title must be {MAX_CREATE_TITLE_LENGTH} characters or less"
            )));
        }
        if let Some(configuration) = &request.configuration {
            validate_configuration(configuration)?;
        }

        let configuration = request
            .configuration
            .unwrap_or_else(|| self.default_configuration.clone());
        let mut conversation = Conversation::create(user_id, request.title, Some(configuration));
        self.persister.save(&mut conversation, 0).await?;

        debug!(conversation_id = %conversation.id, user_id = %user_id, "Conversation created");
        Ok(conversation)
    }

    async fn get(
        &self,
        user_id: UserId,
        id: ConversationId,
    ) -> Result<Conversation, ConversationError> {
        self.load_owned(user_id, id).await
    }

    async fn list(
        &self,
        user_id: UserId,
        page: u64,
        page_size: u64,
    ) -> Result<ConversationPage, ConversationError> {
        self.page(user_id, None, page, page_size).await
    }

    async fn search(
        &self,
        user_id: UserId,
        query: &str,
        page: u64,
        page_size: u64,
    ) -> Result<ConversationPage, ConversationError> {
        if query.trim().is_empty() {
            return Err(ConversationError::Validation(
                "Search query is required".to_string(),
            ));
        }
        self.page(user_id, Some(query), page, page_size).await
    }

    async fn update_title(
        &self,
        user_id: UserId,
        id: ConversationId,
        title: &str,
    ) -> Result<Conversation, ConversationError> {
        if title.trim().chars().count() > MAX_UPDATE_TITLE_LENGTH {
            return Err(ConversationError::Validation(format!(
                "Title must be {MAX_UPDATE_TITLE_LENGTH} characters or less"
            )));
        }

        let mut conversation = self.load_owned(user_id, id).await?;
        conversation.update_title(title)?;

        let stored = conversation.messages().len();
        self.persister.save(&mut conversation, stored).await?;
        Ok(conversation)
    }

    async fn archive(&self, user_id: UserId, id: ConversationId) -> Result<(), ConversationError> {
        let mut conversation = self.load_owned(user_id, id).await?;
        conversation.archive();

        let stored = conversation.messages().len();
        self.persister.save(&mut conversation, stored).await
    }

    async fn delete(&self, user_id: UserId, id: ConversationId) -> Result<(), ConversationError> {
        let mut conversation = self.load_owned(user_id, id).await?;
        conversation.mark_deleted();

        let stored = conversation.messages().len();
        self.persister.save(&mut conversation, stored).await?;

        let _ = self.persister.event_bus.send(Envelope::for_user(
            user_id,
            NotificationEvent::ConversationDeleted {
                conversation_id: id.to_string(),
            },
        ));
        Ok(())
    }

    async fn list_messages(
        &self,
        user_id: UserId,
        id: ConversationId,
    ) -> Result<Vec<Message>, ConversationError> {
        let conversation = self.load_owned(user_id, id).await?;
        Ok(conversation.messages().to_vec())
    }

    async fn send_message(
        &self,
        user_id: UserId,
        id: ConversationId,
        request: SendMessage,
    ) -> Result<MessageExchange, ConversationError> {
        let (mut conversation, user_message) =
            self.append_user_message(user_id, id, request).await?;

        let response = self
            .orchestrator
            .execute(&conversation, conversation.messages())
            .await
            .inspect_err(|e| warn!(conversation_id = %id, error = %e, "Agent execution failed"))?;

        let metadata = reply_metadata(&response);
        let assistant_message = self
            .persister
            .append_reply(
                &mut conversation,
                response.content,
                metadata,
                response.tokens_used,
            )
            .await?;

        Ok(MessageExchange {
            user_message,
            assistant_message,
        })
    }

    async fn send_message_stream(
        &self,
        user_id: UserId,
        id: ConversationId,
        request: SendMessage,
    ) -> Result<ReplyStream, ConversationError> {
        let (conversation, user_message) = self.append_user_message(user_id, id, request).await?;

        let chunks = self
            .orchestrator
            .stream(&conversation, conversation.messages())
            .await
            .inspect_err(|e| warn!(conversation_id = %id, error = %e, "Agent streaming failed"))?;

        let state = StreamState::Streaming(Box::new(Streaming {
            chunks,
            persister: self.persister.clone(),
            conversation,
            prompt: user_message.content.text().to_string(),
            reply: String::new(),
            next_id: 0,
        }));

        Ok(futures::stream::unfold(state, next_chunk).boxed())
    }

    async fn regenerate(
        &self,
        user_id: UserId,
        id: ConversationId,
        message_id: MessageId,
    ) -> Result<Message, ConversationError> {
        let mut conversation = self.load_owned(user_id, id).await?;

        let target = conversation
            .get_message(message_id)
            .ok_or(ConversationError::MessageNotFound(message_id))?;
        if target.role != MessageRole::Assistant {
            return Err(ConversationError::Validation(
                "Only assistant messages can be regenerated".to_string(),
            ));
        }

        let history = conversation
            .history_before(message_id)
            .map(<[Message]>::to_vec)
            .unwrap_or_default();

        let response = self
            .orchestrator
            .execute(&conversation, &history)
            .await
            .inspect_err(|e| warn!(conversation_id = %id, error = %e, "Regeneration failed"))?;

        let metadata = reply_metadata(&response);
        self.persister
            .append_reply(
                &mut conversation,
                response.content,
                metadata,
                response.tokens_used,
            )
            .await
    }
}

struct Streaming {
    chunks: ChunkStream,
    persister: Persister,
    conversation: Conversation,
    prompt: String,
    reply: String,
    next_id: u64,
}

enum StreamState {
    Streaming(Box<Streaming>),
    Done,
}

async fn next_chunk(
    state: StreamState,
) -> Option<(Result<StreamChunk, ConversationError>, StreamState)> {
    let StreamState::Streaming(mut s) = state else {
        return None;
    };

    match s.chunks.next().await {
        Some(Ok(text)) => {
            s.reply.push_str(&text);
            let chunk = StreamChunk {
                chunk_id: s.next_id,
                text,
                is_final: false,
                created_at: Utc::now(),
                message_id: None,
            };
            s.next_id += 1;
            Some((Ok(chunk), StreamState::Streaming(s)))
        }
        Some(Err(e)) => {
            warn!(conversation_id = %s.conversation.id, error = %e, "Reply stream failed");
            Some((Err(e.into()), StreamState::Done))
        }
        None => {
            let Streaming {
                persister,
                mut conversation,
                prompt,
                reply,
                next_id,
                ..
            } = *s;

            let tokens = estimate_tokens(&format!("{prompt}{reply}"));
            let metadata = MessageMetadata {
                tool_invocations: Vec::new(),
                agent_name: Some(PRIMARY_AGENT.to_string()),
                model: Some(conversation.configuration.model_name.clone()),
                token_count: Some(tokens),
            };

            let result = persister
                .append_reply(&mut conversation, reply, metadata, tokens)
                .await
                .map(|message| StreamChunk {
                    chunk_id: next_id,
                    text: String::new(),
                    is_final: true,
                    created_at: Utc::now(),
                    message_id: Some(message.id),
                });
            Some((result, StreamState::Done))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::ScriptedChatClient;
    use crate::tools::ToolRegistry;

    struct Fixture {
        service: SeaOrmConversationService,
        events: broadcast::Receiver<Envelope>,
    }

    async fn fixture(client: ScriptedChatClient) -> Fixture {
        let store = Store::new("sqlite::memory:").await.unwrap();
        let orchestrator = Arc::new(AgentOrchestrator::new(
            Some(Arc::new(client)),
            Arc::new(ToolRegistry::new()),
        ));
        let (tx, rx) = broadcast::channel(32);
        Fixture {
            service: SeaOrmConversationService::new(
                store,
                orchestrator,
                tx,
                AgentConfiguration::default(),
            ),
            events: rx,
        }
    }

    fn send(text: &str) -> SendMessage {
        SendMessage {
            content: text.to_string(),
            attachments: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_create_validates_and_publishes() {
        let mut f = fixture(ScriptedChatClient::replying([])).await;
        let user = UserId::new_v4();

        let too_long = CreateConversation {
            title: Some("x".repeat(501)),
            configuration: None,
        };
        assert!(matches!(
            f.service.create(user, too_long).await,
            Err(ConversationError::Validation(_))
        ));

        let hot = CreateConversation {
            title: None,
            configuration: Some(AgentConfiguration {
                temperature: 2.5,
                ..AgentConfiguration::default()
            }),
        };
        assert!(matches!(
            f.service.create(user, hot).await,
            Err(ConversationError::Validation(_))
        ));

        let created = f
            .service
            .create(user, CreateConversation::default())
            .await
            .unwrap();
        assert_eq!(created.title, "New Conversation");

        let envelope = f.events.try_recv().unwrap();
        assert!(envelope.is_visible_to(user));
        assert!(matches!(
            envelope.event,
            NotificationEvent::ConversationCreated { .. }
        ));
    }

    #[tokio::test]
    async fn test_ownership_is_enforced() {
        let f = fixture(ScriptedChatClient::replying([])).await;
        let owner = UserId::new_v4();
        let intruder = UserId::new_v4();

        let created = f
            .service
            .create(owner, CreateConversation::default())
            .await
            .unwrap();

        assert!(matches!(
            f.service.get(intruder, created.id).await,
            Err(ConversationError::Forbidden(_))
        ));
        assert!(matches!(
            f.service.send_message(intruder, created.id, send("hi")).await,
            Err(ConversationError::Forbidden(_))
        ));
        assert!(matches!(
            f.service.get(owner, ConversationId::new_v4()).await,
            Err(ConversationError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_send_message_appends_exchange() {
        let f = fixture(ScriptedChatClient::replying(["Hello there, friend"])).await;
        let user = UserId::new_v4();
        let created = f
            .service
            .create(user, CreateConversation::default())
            .await
            .unwrap();

        let exchange = f
            .service
            .send_message(user, created.id, send("Hi!"))
            .await
            .unwrap();

        assert_eq!(exchange.user_message.role, MessageRole::User);
        assert_eq!(exchange.assistant_message.content.text(), "Hello there, friend");
        assert_eq!(
            exchange.assistant_message.parent_message_id,
            Some(exchange.user_message.id)
        );
        let metadata = exchange.assistant_message.metadata.as_ref().unwrap();
        assert_eq!(metadata.model.as_deref(), Some("gpt-4o"));
        assert_eq!(metadata.token_count, Some(estimate_tokens("Hi!Hello there, friend")));

        let reloaded = f.service.get(user, created.id).await.unwrap();
        assert_eq!(reloaded.messages().len(), 2);
        assert_eq!(
            reloaded.total_tokens,
            u64::from(estimate_tokens("Hi!Hello there, friend"))
        );
    }

    #[tokio::test]
    async fn test_agent_failure_keeps_user_message() {
        let f = fixture(ScriptedChatClient::failing("upstream down")).await;
        let user = UserId::new_v4();
        let created = f
            .service
            .create(user, CreateConversation::default())
            .await
            .unwrap();

        let err = f
            .service
            .send_message(user, created.id, send("Anyone there?"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConversationError::Agent(_)));

        let messages = f.service.list_messages(user, created.id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content.text(), "Anyone there?");
    }

    #[tokio::test]
    async fn test_message_content_limits() {
        let f = fixture(ScriptedChatClient::replying([])).await;
        let user = UserId::new_v4();
        let created = f
            .service
            .create(user, CreateConversation::default())
            .await
            .unwrap();

        for content in [String::new(), "   ".to_string(), "x".repeat(32_001)] {
            assert!(matches!(
                f.service
                    .send_message(user, created.id, SendMessage { content, attachments: Vec::new() })
                    .await,
                Err(ConversationError::Validation(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_stream_persists_reply_at_end() {
        let f = fixture(ScriptedChatClient::replying(["streamed reply here"])).await;
        let user = UserId::new_v4();
        let created = f
            .service
            .create(user, CreateConversation::default())
            .await
            .unwrap();

        let stream = f
            .service
            .send_message_stream(user, created.id, send("go"))
            .await
            .unwrap();
        let chunks: Vec<StreamChunk> = stream.map(|c| c.unwrap()).collect().await;

        let last = chunks.last().unwrap();
        assert!(last.is_final);
        assert!(chunks[..chunks.len() - 1].iter().all(|c| !c.is_final));
        let text: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(text, "streamed reply here");

        let ids: Vec<u64> = chunks.iter().map(|c| c.chunk_id).collect();
        assert_eq!(ids, (0..chunks.len() as u64).collect::<Vec<_>>());

        let messages = f.service.list_messages(user, created.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].id, last.message_id.unwrap());
        assert_eq!(messages[1].content.text(), "streamed reply here");
    }

    #[tokio::test]
    async fn test_regenerate_uses_preceding_history() {
        let f = fixture(ScriptedChatClient::replying(["first", "second"])).await;
        let user = UserId::new_v4();
        let created = f
            .service
            .create(user, CreateConversation::default())
            .await
            .unwrap();

        let exchange = f
            .service
            .send_message(user, created.id, send("question"))
            .await
            .unwrap();

        assert!(matches!(
            f.service
                .regenerate(user, created.id, exchange.user_message.id)
                .await,
            Err(ConversationError::Validation(_))
        ));
        assert!(matches!(
            f.service.regenerate(user, created.id, MessageId::new_v4()).await,
            Err(ConversationError::MessageNotFound(_))
        ));

        let regenerated = f
            .service
            .regenerate(user, created.id, exchange.assistant_message.id)
            .await
            .unwrap();
        assert_eq!(regenerated.content.text(), "second");
        assert_eq!(regenerated.role, MessageRole::Assistant);

        let messages = f.service.list_messages(user, created.id).await.unwrap();
        assert_eq!(messages.len(), 3);
    }

    #[tokio::test]
    async fn test_delete_hides_conversation() {
        let f = fixture(ScriptedChatClient::replying([])).await;
        let user = UserId::new_v4();
        let keep = f
            .service
            .create(user, CreateConversation {
                title: Some("Rust questions".to_string()),
                configuration: None,
            })
            .await
            .unwrap();
        let gone = f
            .service
            .create(user, CreateConversation::default())
            .await
            .unwrap();

        f.service.delete(user, gone.id).await.unwrap();
        assert!(matches!(
            f.service.get(user, gone.id).await,
            Err(ConversationError::NotFound(_))
        ));

        let page = f.service.list(user, 1, 20).await.unwrap();
        assert_eq!(page.total_count, 1);
        assert_eq!(page.total_pages, 1);
        assert_eq!(page.items[0].id, keep.id.to_string());

        let found = f.service.search(user, "rust", 1, 20).await.unwrap();
        assert_eq!(found.total_count, 1);

        f.service.archive(user, keep.id).await.unwrap();
        let archived = f.service.get(user, keep.id).await.unwrap();
        assert_eq!(archived.status, ConversationStatus::Archived);

        let renamed = f
            .service
            .update_title(user, keep.id, "Renamed")
            .await
            .unwrap();
        assert_eq!(renamed.title, "Renamed");
        assert!(matches!(
            f.service.update_title(user, keep.id, "  ").await,
            Err(ConversationError::Validation(_))
        ));
    }
}
