//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::AppConfig;
use serde::Serialize;
use tracing::info;

use super::{apply_overrides, load_config, redact_address};
use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    consumer: ConsumerInfo,
    log: LogInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    metrics_port: Option<u16>,
}

#[derive(Serialize)]
struct ConsumerInfo {
    address: String,
    exchange: String,
    queue: String,
    routing_key: String,
    consumer_tag: String,
    auto_delete: bool,
    reconnect_interval_ms: u64,
}

#[derive(Serialize)]
struct LogInfo {
    level: String,
    format: String,
    file_and_line: bool,
    target: bool,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    let mut config = load_config(&args.config)?;
    apply_overrides(&mut config.consumer, &args.overrides);

    let info = build_config_info(&config);
    if args.json {
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&info);
    }

    Ok(())
}

fn build_config_info(config: &AppConfig) -> ConfigInfo {
    let consumer = &config.consumer;
    ConfigInfo {
        version: format!("{:?}", config.version),
        consumer: ConsumerInfo {
            address: redact_address(&consumer.address),
            exchange: consumer.exchange.clone(),
            queue: consumer.queue.clone(),
            routing_key: consumer.routing_key.clone(),
            consumer_tag: consumer.consumer_tag.clone(),
            auto_delete: consumer.auto_delete,
            reconnect_interval_ms: consumer.reconnect_interval_ms,
        },
        log: LogInfo {
            level: config.log.level.clone(),
            format: format!("{:?}", config.log.format).to_lowercase(),
            file_and_line: config.log.file_and_line,
            target: config.log.target,
        },
        metrics_port: config.metrics.port,
    }
}

fn print_config_info(info: &ConfigInfo) {
    println!("\n=== Consumer Configuration ===\n");
    println!("Version: {}", info.version);

    println!("\nSubscription:");
    println!("  Broker: {}", info.consumer.address);
    println!("  Exchange: {}", info.consumer.exchange);
    println!("  Queue: {}", info.consumer.queue);
    println!("  Routing key: {:?}", info.consumer.routing_key);
    println!("  Consumer tag: {}", info.consumer.consumer_tag);
    println!("  Auto-delete: {}", info.consumer.auto_delete);
    println!(
        "  Reconnect interval: {}ms (fixed)",
        info.consumer.reconnect_interval_ms
    );

    println!("\nLogging:");
    println!("  Level: {}", info.log.level);
    println!("  Format: {}", info.log.format);
    println!("  File/line: {}", info.log.file_and_line);

    match info.metrics_port {
        Some(port) => println!("\nMetrics: Prometheus on port {}", port),
        None => println!("\nMetrics: disabled"),
    }

    println!();
}
