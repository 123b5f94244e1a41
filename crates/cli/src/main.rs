//! # mq-consumer CLI
//!
//! 命令行接口入口点。
//!
//! 提供：
//! - 配置加载与验证
//! - 消费者生命周期管理
//! - 优雅关闭处理

mod cli;
mod commands;
mod error;
mod handlers;

use anyhow::Result;
use clap::Parser;
use contracts::{AppConfig, LogFormat, LogSettings, MetricsSettings};
use observability::ObservabilityConfig;
use tracing::info;

use cli::{Cli, Commands};
use commands::{load_config, run_consumer, run_info, run_validate};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // `run` takes its log and metrics settings from the configuration file
    let mut loaded = match &cli.command {
        Commands::Run(args) => Some(load_config(&args.config)),
        _ => None,
    };
    let file_config = loaded.as_ref().and_then(|r| r.as_ref().ok());

    // Initialize logging based on CLI options
    init_logging(&cli, file_config)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "mq-consumer starting"
    );

    // Execute command
    let result = match &cli.command {
        Commands::Run(args) => {
            let config = loaded
                .take()
                .unwrap_or_else(|| load_config(&args.config));
            match config {
                Ok(config) => run_consumer(args, config).await,
                Err(e) => Err(e.into()),
            }
        }
        Commands::Validate(args) => run_validate(args),
        Commands::Info(args) => run_info(args),
    };

    if let Err(ref e) = result {
        tracing::error!(error = %e, "Command failed");
    }

    result
}

/// Initialize logging from the configuration file, then apply CLI options
fn init_logging(cli: &Cli, config: Option<&AppConfig>) -> Result<()> {
    let (log, metrics) = match config {
        Some(config) => (config.log.clone(), config.metrics.clone()),
        None => (
            LogSettings {
                format: LogFormat::Pretty,
                ..LogSettings::default()
            },
            MetricsSettings::default(),
        ),
    };

    let mut observability = ObservabilityConfig::from_settings(&log, &metrics);

    if cli.quiet {
        observability.default_log_level = "warn".to_string();
    } else if cli.verbose > 0 {
        observability.default_log_level = match cli.verbose {
            1 => "debug",
            _ => "trace",
        }
        .to_string();
    }

    if let Some(format) = cli.log_format {
        observability.log_format = format.into();
    }

    observability.metrics_port = match &cli.command {
        Commands::Run(args) => match args.metrics_port {
            Some(0) => None,
            Some(port) => Some(port),
            None => observability.metrics_port,
        },
        _ => None,
    };

    observability::init_with_config(observability)
}
