pub mod agents;
pub mod api;
pub mod cli;
pub mod clients;
pub mod config;
pub mod db;
pub mod declarative;
pub mod domain;
pub mod entities;
pub mod security;
pub mod services;
pub mod state;
pub mod storage;
pub mod tools;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, DefinitionCommands, UserCommands};
pub use config::Config;
use declarative::{seed_definitions, seed_sources};
use state::SharedState;

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Serve);

    if matches!(command, Commands::Init) {
        return init_config_file();
    }

    let config = Config::load()?;
    config.validate()?;

    match command {
        Commands::Serve => {
            let prometheus_handle = init_observability(&config)?;
            run_server(config, prometheus_handle).await
        }

        Commands::User { command } => {
            init_cli_logging(&config);
            match command {
                UserCommands::Add {
                    username,
                    password,
                    name,
                    roles,
                } => cli::cmd_user_add(&config, &username, &password, name.as_deref(), &roles).await,
                UserCommands::List => cli::cmd_user_list(&config).await,
            }
        }

        Commands::Definitions { command } => {
            init_cli_logging(&config);
            match command {
                DefinitionCommands::Seed { root } => cli::cmd_definitions_seed(&config, &root).await,
                DefinitionCommands::List => cli::cmd_definitions_list(&config).await,
            }
        }

        Commands::Init => init_config_file(),
    }
}

fn init_config_file() -> anyhow::Result<()> {
    let path = Path::new("config.toml");
    if path.exists() {
        println!("config.toml already exists, leaving it untouched.");
        return Ok(());
    }
    Config::default().save_to_path(path)?;
    println!("✓ Config file created. Set NETGPT_JWT_SECRET and OPENAI_API_KEY, then run again.");
    Ok(())
}

/// Installs the Prometheus recorder and the tracing subscriber (with Loki
/// when enabled) for the long-running server.
fn init_observability(config: &Config) -> anyhow::Result<Option<PrometheusHandle>> {
    let prometheus_handle = if config.observability.metrics_enabled {
        use metrics_exporter_prometheus::PrometheusBuilder;
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("Failed to install Prometheus recorder")?;
        Some(handle)
    } else {
        None
    };

    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer());

    if config.observability.loki_enabled {
        let url = url::Url::parse(&config.observability.loki_url).context("Invalid Loki URL")?;

        let mut builder = tracing_loki::builder().label("app", "netgpt")?;
        for (key, value) in &config.observability.loki_labels {
            if key != "app" {
                builder = builder.label(key.as_str(), value.as_str())?;
            }
        }
        let (layer, task) = builder
            .extra_field("version", env!("CARGO_PKG_VERSION"))?
            .build_url(url)?;

        tokio::spawn(task);

        registry.with(layer).init();
        info!(
            "Loki logging initialized at {}",
            config.observability.loki_url
        );
    } else {
        registry.init();
    }

    if prometheus_handle.is_some() {
        info!("Prometheus metrics recorder initialized");
    }

    Ok(prometheus_handle)
}

fn init_cli_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

async fn run_server(
    config: Config,
    prometheus_handle: Option<PrometheusHandle>,
) -> anyhow::Result<()> {
    info!("netgpt v{} starting...", env!("CARGO_PKG_VERSION"));

    if config.auth.uses_default_secret() {
        warn!(
            "auth.jwt_secret is the built-in development key, set NETGPT_JWT_SECRET before exposing this server"
        );
    }

    let port = config.server.port;
    let seed = config.declarative.seed_on_startup.then(|| {
        (
            config.declarative.agent_samples_dir.clone(),
            config.declarative.workflow_samples_dir.clone(),
        )
    });

    let shared = Arc::new(SharedState::new(config).await?);

    if let Some((agent_dir, workflow_dir)) = seed {
        let stats = seed_definitions(
            &shared.store.definition_repo(),
            Path::new("."),
            &seed_sources(&agent_dir, &workflow_dir),
        )
        .await;
        info!(
            created = stats.created,
            skipped = stats.skipped,
            failed = stats.failed,
            "Definition seeding finished"
        );
    }

    let api_state = api::create_app_state(shared, prometheus_handle);
    let app = api::router(api_state).await;

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Web API listening at http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Web server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Error listening for shutdown: {}", e),
    }
}
