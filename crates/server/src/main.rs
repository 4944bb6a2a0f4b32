mod bootstrap;
mod prune;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use romupunkt_core::config::{AppConfig, LoadOptions};
use romupunkt_telegram::{PollingRunner, ReconnectPolicy, UpdateSource};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::prune::PruneSettings;

fn init_logging(config: &AppConfig) {
    use romupunkt_core::config::LogFormat::*;

    // RUST_LOG wins over the configured level when set.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},teloxide=warn", config.logging.level)));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let shutdown = CancellationToken::new();

    let prune_task = tokio::spawn(prune::run(
        app.stores.photo_sessions.clone(),
        app.dispatcher.sessions().clone(),
        PruneSettings::from_config(&app.config),
        shutdown.child_token(),
    ));

    let source: Arc<dyn UpdateSource> = app.transport.clone();
    let runner = PollingRunner::new(
        source,
        app.dispatcher.clone(),
        ReconnectPolicy::default(),
        Duration::from_secs(app.config.runtime.lane_idle_secs),
        shutdown.clone(),
    );

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!(event_name = "system.server.stopping", "shutdown requested");
                    shutdown.cancel();
                }
                Err(error) => tracing::warn!(
                    event_name = "system.server.signal_unavailable",
                    error = %error,
                    "ctrl-c handler could not be installed"
                ),
            }
        });
    }

    tracing::info!(event_name = "system.server.started", "romupunkt started");
    let outcome = runner.run().await;

    shutdown.cancel();
    if let Err(error) = prune_task.await {
        tracing::warn!(
            event_name = "system.prune.join_failed",
            error = %error,
            "prune task ended abnormally"
        );
    }
    app.db_pool.close().await;
    tracing::info!(event_name = "system.server.stopped", "romupunkt stopped");

    outcome?;
    Ok(())
}
