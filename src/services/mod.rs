pub mod auth_service;
pub mod auth_service_impl;
pub use auth_service::{AuthError, AuthService, IssuedTokens, UserInfo};
pub use auth_service_impl::SeaOrmAuthService;

pub mod conversation_service;
pub mod conversation_service_impl;
pub use conversation_service::{
    ConversationError, ConversationPage, ConversationService, ConversationSummary,
    CreateConversation, MessageExchange, ReplyStream, SendMessage, StreamChunk,
};
pub use conversation_service_impl::SeaOrmConversationService;

pub mod definition_service;
pub mod definition_service_impl;
pub use definition_service::{
    CreateDefinition, DefinitionDto, DefinitionError, DefinitionPage, DefinitionService,
    ExecutionResult,
};
pub use definition_service_impl::SeaOrmDefinitionService;
