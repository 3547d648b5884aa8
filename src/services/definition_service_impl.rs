//! `SeaORM` implementation of the `DefinitionService` trait.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::agents::AgentOrchestrator;
use crate::db::{NewDefinition, Store, format_timestamp};
use crate::declarative::{DeclarativeLoader, check_yaml_syntax};
use crate::domain::events::{Envelope, NotificationEvent};
use crate::entities::definitions;
use crate::services::definition_service::{
    CreateDefinition, DefinitionDto, DefinitionError, DefinitionPage, DefinitionService,
    ExecutionResult,
};

pub struct SeaOrmDefinitionService {
    store: Store,
    loader: Arc<DeclarativeLoader>,
    orchestrator: Arc<AgentOrchestrator>,
    event_bus: broadcast::Sender<Envelope>,
}

impl SeaOrmDefinitionService {
    #[must_use]
    pub const fn new(
        store: Store,
        loader: Arc<DeclarativeLoader>,
        orchestrator: Arc<AgentOrchestrator>,
        event_bus: broadcast::Sender<Envelope>,
    ) -> Self {
        Self {
            store,
            loader,
            orchestrator,
            event_bus,
        }
    }

    async fn find(&self, id: &str) -> Result<definitions::Model, DefinitionError> {
        self.store
            .definition_repo()
            .get_by_id(id)
            .await?
            .ok_or_else(|| DefinitionError::NotFound(id.to_string()))
    }
}

#[async_trait]
impl DefinitionService for SeaOrmDefinitionService {
    async fn create(
        &self,
        created_by: &str,
        request: CreateDefinition,
    ) -> Result<DefinitionDto, DefinitionError> {
        if let Err((message, location)) = check_yaml_syntax(&request.content_yaml) {
            return Err(DefinitionError::InvalidYaml {
                message,
                line: location.map(|l| l.line),
                column: location.map(|l| l.column),
            });
        }

        let candidate = definitions::Model {
            id: String::new(),
            name: request.name.clone(),
            kind: request.kind.clone(),
            version: 0,
            content_yaml: request.content_yaml.clone(),
            created_by: created_by.to_string(),
            created_at: format_timestamp(Utc::now()),
            content_hash: None,
        };
        self.loader.build(&candidate)?;

        let created = self
            .store
            .definition_repo()
            .create(NewDefinition {
                name: request.name,
                kind: request.kind,
                version: 0,
                content_yaml: request.content_yaml,
                created_by: created_by.to_string(),
                content_hash: None,
            })
            .await
            .inspect_err(|e| error!(error = %e, "Failed to create declarative definition"))?;

        info!(name = %created.name, version = created.version, created_by, "Definition created");
        let _ = self
            .event_bus
            .send(Envelope::broadcast(NotificationEvent::DefinitionCreated {
                name: created.name.clone(),
                version: created.version,
            }));

        Ok(DefinitionDto::from(created))
    }

    async fn list(&self, page: u64, page_size: u64) -> Result<DefinitionPage, DefinitionError> {
        let (items, total) = self
            .store
            .definition_repo()
            .list_latest(page, page_size)
            .await?;

        Ok(DefinitionPage {
            items: items.into_iter().map(DefinitionDto::from).collect(),
            page,
            page_size,
            total_count: total,
            total_pages: total.div_ceil(page_size.max(1)),
        })
    }

    async fn get(&self, id: &str) -> Result<DefinitionDto, DefinitionError> {
        self.find(id).await.map(DefinitionDto::from)
    }

    async fn execute(&self, id: &str, input: &str) -> Result<ExecutionResult, DefinitionError> {
        let definition = self.find(id).await?;
        let execution_id = uuid::Uuid::new_v4().to_string();
        let start_time = Utc::now();

        let executable = self.loader.load(&definition).inspect_err(|e| {
            warn!(
                definition_id = %definition.id,
                version = definition.version,
                execution_id = %execution_id,
                error = %e,
                "Declarative execution rejected by loader"
            );
        })?;

        let result = self
            .orchestrator
            .execute_definition(&executable, input)
            .await
            .map_err(|e| DefinitionError::Agent(e.to_string()));
        let end_time = Utc::now();

        match result {
            Ok(response) => {
                info!(
                    definition_id = %definition.id,
                    version = definition.version,
                    execution_id = %execution_id,
                    outcome = "success",
                    "Declarative execution completed"
                );
                Ok(ExecutionResult {
                    definition_id: definition.id,
                    version: definition.version,
                    execution_id,
                    start_time,
                    end_time,
                    result: response,
                })
            }
            Err(e) => {
                warn!(
                    definition_id = %definition.id,
                    version = definition.version,
                    execution_id = %execution_id,
                    outcome = "failure",
                    "Declarative execution failed"
                );
                Err(e)
            }
        }
    }
}
