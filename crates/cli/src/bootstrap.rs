//! Process wiring shared by the subcommands.

use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use streamrelay_agent::TurnController;
use streamrelay_config::AppConfig;
use streamrelay_core::tool::ToolRegistry;
use tracing::info;

/// Load the config file (or `~/.streamrelay/config.toml`) plus env overrides.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load_with_env(path),
        None => AppConfig::load(),
    }
    .context("failed to load configuration")?;
    Ok(config)
}

/// Build a controller over the configured provider, store and tools.
pub async fn build_controller(config: AppConfig) -> anyhow::Result<TurnController> {
    if !config.has_api_key() && config.api_url.is_none() {
        anyhow::bail!(
            "no API key configured: set STREAMRELAY_API_KEY (or OPENAI_API_KEY / GEMINI_API_KEY), \
             or add api_key to {}",
            AppConfig::config_dir().join("config.toml").display()
        );
    }

    let provider = streamrelay_providers::build_from_config(&config)
        .context("failed to set up the provider")?;

    let store_url = store_url(&config)?;
    let store = streamrelay_memory::open(&config.memory.backend, &store_url)
        .await
        .with_context(|| format!("failed to open the {} history store", config.memory.backend))?;

    let tools = default_tools();
    info!(
        provider = provider.name(),
        model = %config.default_model,
        store = %store.name,
        tools = ?tools.names(),
        "Exchange engine ready"
    );

    Ok(TurnController::new(
        provider,
        Arc::new(tools),
        store.history,
        store.sink,
        Arc::new(config),
    )
    .with_metrics(streamrelay_telemetry::global()))
}

pub fn default_tools() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(crate::tools::CurrentTime));
    registry
}

/// The connection string for the configured store, creating the SQLite
/// parent directory when needed.
fn store_url(config: &AppConfig) -> anyhow::Result<String> {
    if config.memory.backend != "sqlite" {
        return Ok(String::new());
    }
    let path = config.memory_path();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    Ok(format!("sqlite://{}", path.display()))
}
