//! `run` command implementation.

use anyhow::Result;
use consumer::{Consumer, ConsumerConfig, LapinClient, MessageHandler};
use contracts::AppConfig;
use tracing::{error, info, warn};

use super::{apply_overrides, redact_address};
use crate::cli::{HandlerKind, RunArgs};
use crate::error::CliError;
use crate::handlers::{LineHandler, LogHandler};

/// Execute the `run` command
pub async fn run_consumer(args: &RunArgs, mut config: AppConfig) -> Result<()> {
    if apply_overrides(&mut config.consumer, &args.overrides) {
        config_loader::ConfigLoader::validate(&config)
            .map_err(|e| CliError::config(args.config.display().to_string(), e))?;
    }

    let consumer_config = config.consumer;
    info!(
        address = %redact_address(&consumer_config.address),
        exchange = %consumer_config.exchange,
        queue = %consumer_config.queue,
        routing_key = %consumer_config.routing_key,
        consumer_tag = %consumer_config.consumer_tag,
        reconnect_interval_ms = consumer_config.reconnect_interval_ms,
        handler = ?args.handler,
        "Configuration loaded"
    );

    match args.handler {
        HandlerKind::Log => consume(consumer_config, LogHandler::default()).await,
        HandlerKind::Stdout => consume(consumer_config, LineHandler::stdout()).await,
    }
}

async fn consume<H>(config: ConsumerConfig, handler: H) -> Result<()>
where
    H: MessageHandler + Sync + 'static,
{
    let queue = config.queue.clone();
    let client =
        LapinClient::new().with_connection_name(format!("mq-consumer/{}", config.consumer_tag));
    let mut consumer = Consumer::new(config, client, handler);

    info!("Starting consumer...");
    consumer
        .start()
        .await
        .map_err(|e| CliError::start(&queue, e))?;

    shutdown_signal().await;
    warn!("Received shutdown signal, stopping consumer...");

    consumer.stop().await;

    let summary = consumer.metrics();
    info!(
        delivered = summary.delivered,
        acked = summary.acked,
        rejected = summary.rejected,
        reconnects = summary.reconnects,
        "Consumer stopped"
    );
    println!("\n{summary}");

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
