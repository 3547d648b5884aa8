use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Signing key used when neither the config file nor the environment sets one.
pub const DEFAULT_JWT_SECRET: &str = "netgpt_dev_secret_change_me";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub server: ServerConfig,

    pub auth: AuthConfig,

    pub openai: OpenAiConfig,

    pub attachments: AttachmentConfig,

    pub declarative: DeclarativeConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub database_path: String,

    pub log_level: String,

    /// Event bus buffer size (default: 100)
    pub event_bus_buffer_size: usize,

    /// Number of tokio worker threads (default: 2)
    /// Set to 0 to use the number of CPU cores
    pub worker_threads: usize,

    /// Maximum database connections (default: 5)
    pub max_db_connections: u32,

    /// Minimum database connections (default: 1)
    pub min_db_connections: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            database_path: "sqlite:data/netgpt.db".to_string(),
            log_level: "info".to_string(),
            event_bus_buffer_size: 100,
            worker_threads: 2,
            max_db_connections: 5,
            min_db_connections: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,

    pub cors_allowed_origins: Vec<String>,

    /// Whether to set the Secure flag on the refresh cookie.
    /// Set to false for local development without HTTPS.
    pub secure_cookies: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            cors_allowed_origins: vec![
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:5173".to_string(),
            ],
            secure_cookies: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret for signing access tokens. Overridden by `NETGPT_JWT_SECRET`.
    #[serde(skip_serializing)]
    pub jwt_secret: String,

    pub issuer: String,

    pub audience: String,

    pub access_token_minutes: i64,

    pub refresh_token_days: i64,

    pub refresh_cookie_name: String,

    pub min_password_length: usize,
}

impl AuthConfig {
    #[must_use]
    pub fn uses_default_secret(&self) -> bool {
        self.jwt_secret == DEFAULT_JWT_SECRET
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: DEFAULT_JWT_SECRET.to_string(),
            issuer: "netgpt".to_string(),
            audience: "netgpt_clients".to_string(),
            access_token_minutes: 15,
            refresh_token_days: 30,
            refresh_cookie_name: "refresh_token".to_string(),
            min_password_length: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiConfig {
    /// Overridden by `OPENAI_API_KEY`. Empty disables the chat client.
    #[serde(skip_serializing)]
    pub api_key: String,

    pub base_url: String,

    pub default_model: String,

    pub max_tokens: u32,

    pub request_timeout_seconds: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            default_model: "gpt-4o".to_string(),
            max_tokens: 4000,
            request_timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentConfig {
    pub storage_path: String,

    pub max_size_bytes: u64,

    /// Prefix used when building download URLs for stored files.
    pub public_url_prefix: String,
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            storage_path: "data/attachments".to_string(),
            max_size_bytes: 10 * 1024 * 1024,
            public_url_prefix: "/api/files".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeclarativeConfig {
    pub cache_ttl_seconds: u64,

    /// Directory whose YAML files are seeded as `Prompt` definitions.
    pub agent_samples_dir: String,

    /// Directory whose YAML files are seeded as `Workflow` definitions.
    pub workflow_samples_dir: String,

    /// Seed sample directories on `serve` startup.
    pub seed_on_startup: bool,
}

impl Default for DeclarativeConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: 5 * 60,
            agent_samples_dir: "agent-samples".to_string(),
            workflow_samples_dir: "workflow-samples".to_string(),
            seed_on_startup: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,

    pub loki_enabled: bool,

    pub loki_url: String,

    pub loki_labels: std::collections::HashMap<String, String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        let mut labels = std::collections::HashMap::new();
        labels.insert("app".to_string(), "netgpt".to_string());

        Self {
            metrics_enabled: true,
            loki_enabled: false,
            loki_url: "http://localhost:3100".to_string(),
            loki_labels: labels,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            openai: OpenAiConfig::default(),
            attachments: AttachmentConfig::default(),
            declarative: DeclarativeConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let paths = Self::config_paths();

        let mut config = None;
        for path in &paths {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                config = Some(Self::load_from_path(path)?);
                break;
            }
        }

        let mut config = config.unwrap_or_else(|| {
            info!("No config file found, using defaults");
            Self::default()
        });
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Secrets never live in the TOML file written by `save_to_path`, so they
    /// are taken from the environment when present.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var("NETGPT_JWT_SECRET")
            && !secret.is_empty()
        {
            self.auth.jwt_secret = secret;
        }

        if let Ok(key) = std::env::var("OPENAI_API_KEY")
            && !key.is_empty()
        {
            self.openai.api_key = key;
        }
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Config saved to: {}", path.display());
        Ok(())
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![];

        paths.push(PathBuf::from("config.toml"));

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("netgpt").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".netgpt").join("config.toml"));
        }

        paths
    }

    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.trim().is_empty() {
            anyhow::bail!("auth.jwt_secret cannot be empty");
        }

        if self.auth.access_token_minutes <= 0 || self.auth.refresh_token_days <= 0 {
            anyhow::bail!("Token lifetimes must be positive");
        }

        if self.auth.refresh_cookie_name.is_empty() {
            anyhow::bail!("auth.refresh_cookie_name cannot be empty");
        }

        if self.attachments.max_size_bytes == 0 {
            anyhow::bail!("attachments.max_size_bytes must be > 0");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.auth.access_token_minutes, 15);
        assert_eq!(config.auth.refresh_token_days, 30);
        assert_eq!(config.auth.refresh_cookie_name, "refresh_token");
        assert_eq!(config.openai.default_model, "gpt-4o");
        assert_eq!(config.declarative.cache_ttl_seconds, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization_omits_secrets() {
        let mut config = Config::default();
        config.openai.api_key = "sk-test".to_string();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[auth]"));
        assert!(!toml_str.contains("sk-test"));
        assert!(!toml_str.contains("jwt_secret"));
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [general]
            log_level = "debug"

            [auth]
            access_token_minutes = 5
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.auth.access_token_minutes, 5);

        assert_eq!(config.auth.issuer, "netgpt");
    }

    #[test]
    fn test_default_secret_is_detected() {
        let mut config = Config::default();
        assert!(config.auth.uses_default_secret());

        config.auth.jwt_secret = "a-deployment-specific-key".to_string();
        assert!(!config.auth.uses_default_secret());
    }

    #[test]
    fn test_validate_rejects_empty_secret() {
        let mut config = Config::default();
        config.auth.jwt_secret = "  ".to_string();
        assert!(config.validate().is_err());
    }
}
