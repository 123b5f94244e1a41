//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::AppConfig;
use serde::Serialize;
use tracing::info;

use super::{load_config, redact_address};
use crate::cli::ValidateArgs;

/// Shortest reconnect interval not flagged as aggressive
const MIN_QUIET_RECONNECT_MS: u64 = 100;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    address: String,
    exchange: String,
    queue: String,
    routing_key: String,
    consumer_tag: String,
    reconnect_interval_ms: u64,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    match load_config(&args.config) {
        Ok(config) => {
            let warnings = collect_warnings(&config);
            let consumer = &config.consumer;

            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    version: format!("{:?}", config.version),
                    address: redact_address(&consumer.address),
                    exchange: consumer.exchange.clone(),
                    queue: consumer.queue.clone(),
                    routing_key: consumer.routing_key.clone(),
                    consumer_tag: consumer.consumer_tag.clone(),
                    reconnect_interval_ms: consumer.reconnect_interval_ms,
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(config: &AppConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    let consumer = &config.consumer;

    if consumer.exchange.is_empty() {
        warnings.push(
            "exchange is empty - brokers refuse bindings to the default exchange".to_string(),
        );
    }

    if consumer.routing_key.is_empty() {
        warnings.push(
            "routing_key is empty - only messages published with an empty key are routed"
                .to_string(),
        );
    }

    if consumer.reconnect_interval_ms < MIN_QUIET_RECONNECT_MS {
        warnings.push(format!(
            "reconnect_interval_ms is {} - retries may hammer a recovering broker",
            consumer.reconnect_interval_ms
        ));
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Broker: {}", summary.address);
            println!("  Exchange: {}", summary.exchange);
            println!("  Queue: {}", summary.queue);
            println!("  Routing key: {:?}", summary.routing_key);
            println!("  Consumer tag: {}", summary.consumer_tag);
            println!("  Reconnect interval: {}ms", summary.reconnect_interval_ms);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
