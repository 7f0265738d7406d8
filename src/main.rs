//! Curator Backend
//!
//! Catalog sync, pattern analysis and request classification service.

use curator::{api, core, db, provider};

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration (handles CLI args, env vars, and config file)
    let config = match core::config::Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            // Logging isn't initialized yet
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let _logger = match core::Logger::init(&config.logging) {
        Ok(logger) => logger,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return Err(e);
        }
    };

    info!("Starting Curator v{}", curator::VERSION);
    info!(
        host = %config.server.host,
        port = config.server.port,
        "Server configuration"
    );
    info!(path = ?config.database.path, "Database configuration");

    if let Some(parent) = config.database.path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            info!("Creating directory: {:?}", parent);
            std::fs::create_dir_all(parent)
                .map_err(|e| anyhow::anyhow!("Failed to create directory {:?}: {}", parent, e))?;
        }
    }

    info!("Initializing database...");
    let db = Arc::new(db::DatabaseManager::new(
        &config.database.path,
        config.database.connection_pool_size as u32,
        Duration::from_millis(config.database.busy_timeout),
    )?);
    db.migrate()?;
    info!("Database initialized successfully");

    let registry =
        provider::ProviderRegistry::with_defaults(Duration::from_secs(config.sync.request_timeout_secs))?;

    let chat: Arc<dyn core::ChatClient> = if config.ai.is_enabled() {
        info!(model = %config.ai.model, "AI chat enabled for the rule builder");
        Arc::new(core::OpenAiChatClient::new(&config.ai)?)
    } else {
        info!("No AI API key configured; rule builder chat is disabled");
        Arc::new(core::DisabledChatClient)
    };

    let scheduler_enabled = config.scheduler.enabled;
    let sweep_interval = Duration::from_secs(config.rule_builder.sweep_interval_secs);

    let state = api::AppState::new(config, db, registry, chat, Arc::new(core::SystemClock));

    let scheduler_handle = if scheduler_enabled {
        Some(tokio::spawn(state.scheduler.clone().start()))
    } else {
        info!("Scheduler disabled");
        None
    };
    let sweeper = state.rule_builder.clone().spawn_sweeper(sweep_interval);

    let scheduler = state.scheduler.clone();
    let server = api::ApiServer::new(state);

    info!("Curator initialized successfully");
    server.serve().await?;

    sweeper.abort();
    if let Some(handle) = scheduler_handle {
        scheduler.shutdown().await;
        // Lets an in-flight tick finish
        let _ = handle.await;
    }
    info!("Curator stopped");

    Ok(())
}
