pub mod aggregate;
pub mod cli;
pub mod core;
pub mod providers;
pub mod refresh;
pub mod server;

use crate::aggregate::Orchestrator;
use crate::core::config::AppConfig;
use crate::providers::http::HttpTransport;
use crate::refresh::RefreshCache;
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info};

pub enum AppCommand {
    Fetch,
    Serve,
}

pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");
    Ok(config)
}

/// Wires the configured sources into an orchestrator over a shared transport.
pub fn build_orchestrator(config: &AppConfig) -> Result<Orchestrator> {
    let transport = Arc::new(HttpTransport::new()?);
    let sources = providers::build_sources(config, transport);
    Ok(Orchestrator::from_config(&config.aggregation, sources))
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("xrates starting...");
    let config = load_config(config_path)?;
    let orchestrator = build_orchestrator(&config)?;

    match command {
        AppCommand::Fetch => cli::fetch::run(&orchestrator).await,
        AppCommand::Serve => {
            let cache = Arc::new(RefreshCache::new(Arc::new(orchestrator), config.cache.ttl()));
            server::serve(cache, &config.server).await
        }
    }
}
