//! Configuration validation
//!
//! Rules:
//! - field rules declared on `ConsumerConfig` (non-empty address/queue/tag, interval >= 1ms)
//! - broker address uses the `amqp://` or `amqps://` scheme
//! - log level parses as a level filter

use std::str::FromStr;

use ::validator::Validate;
use contracts::{AppConfig, ContractError, ConsumerConfig, LogSettings};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

const ALLOWED_SCHEMES: [&str; 2] = ["amqp://", "amqps://"];

/// Validate an AppConfig
///
/// Returns the first error encountered, or Ok(()).
pub fn validate(config: &AppConfig) -> Result<(), ContractError> {
    validate_consumer_fields(&config.consumer)?;
    validate_address_scheme(&config.consumer)?;
    validate_log_settings(&config.log)?;
    Ok(())
}

fn validate_consumer_fields(consumer: &ConsumerConfig) -> Result<(), ContractError> {
    consumer
        .validate()
        .map_err(|e| ContractError::config_validation("consumer", e.to_string()))
}

fn validate_address_scheme(consumer: &ConsumerConfig) -> Result<(), ContractError> {
    let address = consumer.address.to_lowercase();
    if ALLOWED_SCHEMES.iter().any(|scheme| address.starts_with(scheme)) {
        return Ok(());
    }
    Err(ContractError::config_validation(
        "consumer.address",
        format!(
            "address '{}' must start with amqp:// or amqps://",
            consumer.address
        ),
    ))
}

/// A bare word must be a level; directive lists must parse as an `EnvFilter`
///
/// `EnvFilter` alone would take an unknown bare word as a target name.
fn validate_log_settings(log: &LogSettings) -> Result<(), ContractError> {
    let level = log.level.trim();
    let parsed = if level.contains(['=', ',']) {
        EnvFilter::try_new(level).map(|_| ()).map_err(|e| e.to_string())
    } else {
        LevelFilter::from_str(level).map(|_| ()).map_err(|e| e.to_string())
    };
    parsed.map_err(|e| {
        ContractError::config_validation(
            "log.level",
            format!("unknown log level '{}': {e}", log.level),
        )
    })
}
