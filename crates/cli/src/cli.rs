//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// mq-consumer - reconnecting AMQP queue consumer
#[derive(Parser, Debug)]
#[command(
    name = "mq-consumer",
    author,
    version,
    about = "Reconnecting AMQP queue consumer",
    long_about = "Subscribes to a broker queue, hands every message to a built-in handler, \n\
                  acks on success and requeues on failure.\n\n\
                  Connection or channel loss is recovered automatically at a fixed \n\
                  interval until the process is stopped."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "MQ_CONSUMER_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format (defaults to the configuration file's `log.format`)
    #[arg(long, value_enum, global = true, env = "MQ_CONSUMER_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the consumer until Ctrl-C / SIGTERM
    Run(RunArgs),

    /// Validate configuration file without connecting
    Validate(ValidateArgs),

    /// Display the effective configuration
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "config.toml",
        env = "MQ_CONSUMER_CONFIG"
    )]
    pub config: PathBuf,

    #[command(flatten)]
    pub overrides: ConsumerOverrides,

    /// Built-in message handler
    #[arg(long, value_enum, default_value = "log", env = "MQ_CONSUMER_HANDLER")]
    pub handler: HandlerKind,

    /// Metrics server port (overrides `metrics.port`, 0 = disabled)
    #[arg(long, env = "MQ_CONSUMER_METRICS_PORT")]
    pub metrics_port: Option<u16>,
}

/// Consumer settings that may override the configuration file
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ConsumerOverrides {
    /// Override broker address
    #[arg(long, env = "MQ_CONSUMER_ADDRESS")]
    pub address: Option<String>,

    /// Override exchange name
    #[arg(long, env = "MQ_CONSUMER_EXCHANGE")]
    pub exchange: Option<String>,

    /// Override queue name
    #[arg(long, env = "MQ_CONSUMER_QUEUE")]
    pub queue: Option<String>,

    /// Override routing key
    #[arg(long, env = "MQ_CONSUMER_ROUTING_KEY")]
    pub routing_key: Option<String>,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    #[command(flatten)]
    pub overrides: ConsumerOverrides,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Built-in handler selection
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HandlerKind {
    /// Log a preview of each body and ack
    #[default]
    Log,
    /// Write each body to stdout as a line; fail on write errors
    Stdout,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for contracts::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args() {
        let cli = Cli::try_parse_from([
            "mq-consumer",
            "-v",
            "run",
            "--config",
            "consumer.toml",
            "--queue",
            "orders",
            "--handler",
            "stdout",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 1);
        assert!(cli.log_format.is_none());
        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.config, PathBuf::from("consumer.toml"));
        assert_eq!(args.overrides.queue.as_deref(), Some("orders"));
        assert_eq!(args.handler, HandlerKind::Stdout);
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["mq-consumer", "-q", "-v", "validate"]).is_err());
    }
}
