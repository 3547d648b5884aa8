use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware,
    routing::{delete, get, post, put},
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::domain::events::Envelope;
use crate::services::{AuthService, ConversationService, DefinitionService};
use crate::state::SharedState;

mod attachments;
pub mod auth;
mod conversations;
mod definitions;
mod error;
pub mod events;
mod health;
mod messages;
mod observability;
mod tools;
mod types;
mod validation;

pub use error::ApiError;
pub use types::*;

/// Multipart framing on top of the attachment size limit.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub shared: Arc<SharedState>,

    pub start_time: std::time::Instant,

    pub prometheus_handle: Option<PrometheusHandle>,
}

impl AppState {
    #[must_use]
    pub fn config(&self) -> &Arc<RwLock<Config>> {
        &self.shared.config
    }

    #[must_use]
    pub fn store(&self) -> &crate::db::Store {
        &self.shared.store
    }

    #[must_use]
    pub fn event_bus(&self) -> &broadcast::Sender<Envelope> {
        &self.shared.event_bus
    }

    #[must_use]
    pub fn auth_service(&self) -> &Arc<dyn AuthService> {
        &self.shared.auth_service
    }

    #[must_use]
    pub fn conversation_service(&self) -> &Arc<dyn ConversationService> {
        &self.shared.conversation_service
    }

    #[must_use]
    pub fn definition_service(&self) -> &Arc<dyn DefinitionService> {
        &self.shared.definition_service
    }
}

#[must_use]
pub fn create_app_state(
    shared: Arc<SharedState>,
    prometheus_handle: Option<PrometheusHandle>,
) -> Arc<AppState> {
    Arc::new(AppState {
        shared,
        start_time: std::time::Instant::now(),
        prometheus_handle,
    })
}

pub async fn router(state: Arc<AppState>) -> Router {
    let (cors_origins, upload_limit) = {
        let config = state.config().read().await;
        (
            config.server.cors_allowed_origins.clone(),
            usize::try_from(config.attachments.max_size_bytes)
                .unwrap_or(usize::MAX)
                .saturating_add(MULTIPART_OVERHEAD_BYTES),
        )
    };

    let protected_routes = create_protected_router(state.clone(), upload_limit);

    let api_router = Router::new()
        .merge(protected_routes)
        .route("/health", get(health::health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/logout", post(auth::logout))
        .with_state(state);

    let cors_layer = if cors_origins.iter().any(|o| o == "*") {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|s| s.parse().ok()).collect();
        CorsLayer::new().allow_origin(origins)
    };

    Router::new()
        .nest("/api", api_router)
        .layer(cors_layer.allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(observability::security_headers_middleware))
        .layer(middleware::from_fn(observability::logging_middleware))
}

fn create_protected_router(state: Arc<AppState>, upload_limit: usize) -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/me", get(auth::me))
        .route("/conversations", post(conversations::create_conversation))
        .route("/conversations", get(conversations::list_conversations))
        .route(
            "/conversations/search",
            get(conversations::search_conversations),
        )
        .route("/conversations/{id}", get(conversations::get_conversation))
        .route(
            "/conversations/{id}",
            delete(conversations::delete_conversation),
        )
        .route(
            "/conversations/{id}/title",
            put(conversations::update_title),
        )
        .route(
            "/conversations/{id}/archive",
            post(conversations::archive_conversation),
        )
        .route(
            "/conversations/{id}/messages",
            get(messages::list_messages),
        )
        .route(
            "/conversations/{id}/messages",
            post(messages::send_message),
        )
        .route(
            "/conversations/{id}/messages/stream",
            post(messages::stream_message),
        )
        .route(
            "/conversations/{id}/messages/regenerate",
            post(messages::regenerate),
        )
        .route("/tools", get(tools::list_tools))
        .route("/tools/{name}", get(tools::get_tool))
        .route("/tools/{name}/invoke", post(tools::invoke_tool))
        .route(
            "/attachments",
            post(attachments::upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/files/{key}", get(attachments::download))
        .route("/definitions", post(definitions::create_definition))
        .route("/definitions", get(definitions::list_definitions))
        .route("/definitions/{id}", get(definitions::get_definition))
        .route(
            "/definitions/{id}/execute",
            post(definitions::execute_definition),
        )
        .route("/metrics", get(observability::get_metrics))
        .merge(events::router())
        .route_layer(middleware::from_fn_with_state(state, auth::auth_middleware))
}
