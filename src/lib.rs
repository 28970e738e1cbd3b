pub mod agent;
pub mod bridge;
pub mod collector;
pub mod commands;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod models;
pub mod normalize;
pub mod scheduler;
pub mod settings;
pub mod sources;
pub mod store;
pub mod utils;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use agent::{Agent, AgentBuilder};
pub use bridge::ExportBridge;
pub use collector::CollectorClient;
pub use commands::{CommandChannel, Directive, RawDirective};
pub use db::Database;
pub use dispatcher::{DeliveryResult, DispatcherConfig, MemorySink, RemoteSink, SyncDispatcher};
pub use error::AgentError;
pub use models::{CommandResult, Envelope, Event, Source};
pub use scheduler::{ForceSync, MonitorScheduler, MonitorState, MonitorStatus};
pub use settings::{AgentConfig, ConfigStore};
pub use sources::{LogAdapter, PollOutcome, SourceAdapter};
pub use store::{MemoryStateStore, StateStore, WatermarkCommit};

const DIRECTIVE_QUEUE: usize = 32;

/// Registers the export-backed sources on `builder`.
fn register_export(builder: AgentBuilder, export: &ExportBridge, config: &AgentConfig) -> AgentBuilder {
    let lookups = export.lookups();
    builder
        .adapter(Arc::new(LogAdapter::new(export.message_log(), lookups.clone())))
        .adapter(Arc::new(LogAdapter::new(export.call_log(), lookups.clone())))
        .adapter(Arc::new(LogAdapter::new(export.usage_log(), lookups)))
        .location_feed(Arc::new(export.location_feed()), config.location.priority)
}

/// Runs the agent until ctrl-c.
pub async fn run() -> Result<()> {
    utils::logging::init(settings::debug_enabled());

    let config_store = ConfigStore::load_or_create(settings::default_config_path())?;
    let config = config_store.resolved()?;
    info!(
        "telemetry agent {} starting for device {}",
        env!("CARGO_PKG_VERSION"),
        config.device_id
    );

    let database = Database::new(config.state_database.clone())
        .context("failed to open agent state database")?;
    let collector = Arc::new(CollectorClient::new(&config.collector, config.device_id.clone())?);

    let mut builder = Agent::builder(Arc::new(database), collector.clone()).config(&config);
    match &config.provider_database {
        Some(path) => {
            let export = ExportBridge::open(path)?;
            builder = register_export(builder, &export, &config);
        }
        None => warn!("no providerDatabase configured; no sources will be monitored"),
    }

    let agent = builder.build();
    agent.start_all().await;

    let cancel = CancellationToken::new();
    let (directive_tx, directive_rx) = mpsc::channel(DIRECTIVE_QUEUE);
    let commands = tokio::spawn(agent.commands().run(directive_rx, cancel.clone()));

    let poll_every = Duration::from_millis(config.collector.command_poll_interval_ms);
    let poller = {
        let collector = Arc::clone(&collector);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            collector
                .poll_directives(poll_every, directive_tx, cancel)
                .await
        })
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");

    cancel.cancel();
    let _ = poller.await;
    let _ = commands.await;
    agent.shutdown().await?;

    info!("telemetry agent stopped");
    Ok(())
}
