//! Coach application binary - composition root.
//!
//! Ties the Coach crates together into a single executable:
//! 1. Load configuration from TOML
//! 2. Open the tenant SQLite database
//! 3. Build the model client and fallback chain
//! 4. Assemble the question-answering pipeline
//! 5. Start the axum REST API server

mod cli;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use coach_api::auth::IdentityProvider;
use coach_api::{routes, AppState};
use coach_core::config::CoachConfig;
use coach_model::{FallbackChain, GeminiClient};
use coach_pipeline::{AnswerCache, CoachOrchestrator, SqliteExecutor, StaticSchema};

use crate::cli::CliArgs;

/// Expand a leading ~ to the home directory.
fn expand_home(path: &str) -> PathBuf {
    if path.starts_with("~/") || path.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&path[2..])
    } else {
        PathBuf::from(path)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config first, so CLI overrides can be applied on top.
    let config_file = args.resolve_config_path();
    let mut config = CoachConfig::load_or_default(&config_file);
    if let Some(port) = args.port {
        config.general.port = port;
    }
    if let Some(db) = args.resolve_database() {
        config.general.database_path = db;
    }
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }

    // Tracing. RUST_LOG wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(config.general.log_level.clone())
            }),
        )
        .init();

    tracing::info!("Starting Coach v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(path = %config_file.display(), "Configuration loaded");

    // Tenant database.
    let db_path = expand_home(&config.general.database_path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let executor = SqliteExecutor::open(&db_path)?;
    tracing::info!(path = %db_path.display(), "Tenant database opened");

    // Model client. A missing key still starts the server; the coach
    // endpoint reports 503 until one is configured.
    let api_key = config.model.resolve_api_key();
    let model_configured = api_key.is_some();
    if !model_configured {
        tracing::warn!(
            "No model API key found (GEMINI_API_KEY or config); coach endpoint disabled"
        );
    }
    let client = GeminiClient::new(
        api_key.unwrap_or_default(),
        config.model.base_url.clone(),
        Duration::from_secs(config.model.timeout_secs),
    );
    let chain = Arc::new(FallbackChain::new(
        Arc::new(client),
        config.model.primary_variant.clone(),
        &config.model.fallback_variants,
    ));
    tracing::info!(variants = chain.variants().len(), "Model fallback chain ready");

    // Pipeline.
    let schema = match &config.schema.description {
        Some(text) => StaticSchema::new(text.clone()),
        None => StaticSchema::default(),
    };
    let orchestrator = CoachOrchestrator::new(
        chain,
        Arc::new(executor),
        Arc::new(schema),
        Arc::new(AnswerCache::new(config.cache.ttl_secs)),
        &config.prompt,
    );

    if config.auth.tokens.is_empty() {
        tracing::warn!("No API tokens configured; every request will be rejected");
    }
    let identity = IdentityProvider::new(config.auth.tokens.clone());

    let port = args.resolve_port(config.general.port);
    let state = AppState::new(Arc::new(orchestrator), identity, model_configured, port)
        .with_allowed_origins(config.general.allowed_origins.clone());

    routes::start_server(state).await?;

    Ok(())
}
