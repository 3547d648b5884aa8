use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};

use super::cache::DeclarativeCache;
use crate::agents::{AgentExecutable, ChatClient};
use crate::entities::definitions;
use crate::tools::ToolRegistry;

pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Definition types that are executed through the chat client.
const CHAT_CLIENT_TYPES: [&str; 3] = ["openai", "azureai", "foundry_agent"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoaderError {
    #[error("YAML parse failed: {0}")]
    Parse(String),

    #[error("Definition missing required fields 'type' or 'name'.")]
    MissingFields,

    #[error("Unknown tool(s) referenced: {}", .0.join(","))]
    UnknownTools(Vec<String>),

    #[error("Missing chat client provider for definition '{0}'")]
    MissingChatClient(String),
}

/// The YAML shape of a definition.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DefinitionModel {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub instructions: Option<String>,
    pub model: Option<String>,
    pub tools: Option<Vec<String>>,
}

/// Location of a YAML syntax error, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YamlErrorLocation {
    pub line: usize,
    pub column: usize,
}

/// Checks that `content` is well-formed YAML without interpreting it.
pub fn check_yaml_syntax(content: &str) -> Result<(), (String, Option<YamlErrorLocation>)> {
    serde_yaml::from_str::<serde_yaml::Value>(content)
        .map(|_| ())
        .map_err(|e| {
            let location = e.location().map(|l| YamlErrorLocation {
                line: l.line(),
                column: l.column(),
            });
            (e.to_string(), location)
        })
}

/// Builds and caches executables from stored definitions.
pub struct DeclarativeLoader {
    tools: Arc<ToolRegistry>,
    chat_client: Option<Arc<dyn ChatClient>>,
    cache: DeclarativeCache<Arc<AgentExecutable>>,
}

impl DeclarativeLoader {
    #[must_use]
    pub fn new(
        tools: Arc<ToolRegistry>,
        chat_client: Option<Arc<dyn ChatClient>>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            tools,
            chat_client,
            cache: DeclarativeCache::new(cache_ttl),
        }
    }

    #[must_use]
    pub fn cache_key(definition: &definitions::Model) -> String {
        format!("{}:{}", definition.name, definition.version)
    }

    /// Returns the cached executable for this exact version, building it on a miss.
    /// A fresh build evicts every cached version of the same name.
    pub fn load(&self, definition: &definitions::Model) -> Result<Arc<AgentExecutable>, LoaderError> {
        let key = Self::cache_key(definition);
        if let Some(cached) = self.cache.get(&key) {
            debug!(key = %key, "Declarative cache hit");
            return Ok(cached);
        }

        let executable = Arc::new(self.build(definition)?);

        self.cache.evict_by_prefix(&format!("{}:", definition.name));
        self.cache.set(&key, Arc::clone(&executable), None);

        Ok(executable)
    }

    /// Parses and resolves a definition without touching the cache.
    pub fn build(&self, definition: &definitions::Model) -> Result<AgentExecutable, LoaderError> {
        let model: DefinitionModel = serde_yaml::from_str::<Option<DefinitionModel>>(
            &definition.content_yaml,
        )
        .map_err(|e| {
            error!(name = %definition.name, error = %e, "Failed to parse declarative definition YAML");
            LoaderError::Parse(e.to_string())
        })?
        .unwrap_or_default();

        if model.kind.trim().is_empty() || model.name.trim().is_empty() {
            return Err(LoaderError::MissingFields);
        }

        let requested = model.tools.unwrap_or_default();
        let mut resolved = Vec::with_capacity(requested.len());
        let mut missing = Vec::new();
        for name in requested {
            match self.tools.get(&name) {
                Some(tool) => resolved.push(tool),
                None => missing.push(name),
            }
        }
        if !missing.is_empty() {
            return Err(LoaderError::UnknownTools(missing));
        }

        let needs_client = CHAT_CLIENT_TYPES
            .iter()
            .any(|t| model.kind.eq_ignore_ascii_case(t));
        if needs_client && self.chat_client.is_none() {
            return Err(LoaderError::MissingChatClient(definition.name.clone()));
        }

        Ok(AgentExecutable::new(
            model.name,
            model.instructions.unwrap_or_default(),
            model
                .model
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            resolved,
            self.chat_client.clone(),
        ))
    }
}
