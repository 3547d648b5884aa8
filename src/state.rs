use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, broadcast};
use tracing::{info, warn};

use crate::agents::{AgentOrchestrator, ChatClient};
use crate::clients::openai::OpenAiChatClient;
use crate::config::Config;
use crate::db::Store;
use crate::declarative::DeclarativeLoader;
use crate::domain::AgentConfiguration;
use crate::domain::events::Envelope;
use crate::security::TokenService;
use crate::services::{
    AuthService, ConversationService, DefinitionService, SeaOrmAuthService,
    SeaOrmConversationService, SeaOrmDefinitionService,
};
use crate::storage::FileStorage;
use crate::tools::ToolRegistry;

/// Builds the chat client from config. A missing API key leaves the
/// service running without one; agent calls then fail with a configuration error.
pub fn build_chat_client(config: &Config) -> Option<Arc<dyn ChatClient>> {
    match OpenAiChatClient::new(&config.openai) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            warn!(error = %e, "Chat client unavailable");
            None
        }
    }
}

#[derive(Clone)]
pub struct SharedState {
    pub config: Arc<RwLock<Config>>,

    pub store: Store,

    pub tokens: Arc<TokenService>,

    pub tools: Arc<ToolRegistry>,

    pub storage: FileStorage,

    pub event_bus: broadcast::Sender<Envelope>,

    pub auth_service: Arc<dyn AuthService>,

    pub conversation_service: Arc<dyn ConversationService>,

    pub definition_service: Arc<dyn DefinitionService>,
}

impl SharedState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let chat_client = build_chat_client(&config);
        Self::with_chat_client(config, chat_client).await
    }

    /// Wires every service around the given chat client.
    pub async fn with_chat_client(
        config: Config,
        chat_client: Option<Arc<dyn ChatClient>>,
    ) -> anyhow::Result<Self> {
        let store = Store::with_pool_options(
            &config.general.database_path,
            config.general.max_db_connections,
            config.general.min_db_connections,
        )
        .await?;

        let (event_bus, _) = broadcast::channel(config.general.event_bus_buffer_size);

        let tokens = Arc::new(TokenService::new(&config.auth));
        let tools = Arc::new(ToolRegistry::with_builtins());
        let orchestrator = Arc::new(AgentOrchestrator::new(chat_client.clone(), tools.clone()));
        let loader = Arc::new(DeclarativeLoader::new(
            tools.clone(),
            chat_client,
            Duration::from_secs(config.declarative.cache_ttl_seconds),
        ));

        let storage = FileStorage::new(
            &config.attachments.storage_path,
            &config.attachments.public_url_prefix,
        )
        .await?;
        info!(path = %storage.root().display(), "Attachment storage ready");

        let auth_service = Arc::new(SeaOrmAuthService::new(
            store.clone(),
            tokens.clone(),
            config.auth.min_password_length,
        )) as Arc<dyn AuthService>;

        let default_configuration = AgentConfiguration {
            model_name: config.openai.default_model.clone(),
            max_tokens: config.openai.max_tokens,
            ..AgentConfiguration::default()
        };
        let conversation_service = Arc::new(SeaOrmConversationService::new(
            store.clone(),
            orchestrator.clone(),
            event_bus.clone(),
            default_configuration,
        )) as Arc<dyn ConversationService>;

        let definition_service = Arc::new(SeaOrmDefinitionService::new(
            store.clone(),
            loader,
            orchestrator,
            event_bus.clone(),
        )) as Arc<dyn DefinitionService>;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            store,
            tokens,
            tools,
            storage,
            event_bus,
            auth_service,
            conversation_service,
            definition_service,
        })
    }

    pub async fn config(&self) -> Config {
        self.config.read().await.clone()
    }
}
