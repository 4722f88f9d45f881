//! ctxtune - find the largest usable context window for local language models

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ctxtune_core::{LoggingConfig, TuneConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info};

mod commands;
mod config;
mod output;
mod report;
mod specs;

use config::TuneArgs;

/// Step a model's context window up until memory, speed or latency limits are hit
#[derive(Debug, Parser)]
#[command(name = "ctxtune")]
#[command(about = "Find the largest usable context window for locally hosted language models")]
#[command(version)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text or json)
    #[arg(long, value_name = "FORMAT", global = true, value_parser = ["text", "json"])]
    log_format: Option<String>,

    /// Only print the final summary
    #[arg(short, long)]
    quiet: bool,

    #[command(flatten)]
    tune: TuneArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List the models installed on the inference server
    #[command(name = "models")]
    Models {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run_cli(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            let fatal = e
                .downcast_ref::<ctxtune_core::Error>()
                .map_or(false, ctxtune_core::Error::is_fatal);
            if fatal {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run_cli(cli: Cli) -> Result<()> {
    let mut config =
        TuneConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.tune.apply_to(&mut config);
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }

    init_logging(&config.logging);
    debug!("Starting ctxtune with config: {:?}", config);

    config.validate().context("Invalid configuration")?;

    match cli.command {
        Some(Commands::Models { json }) => commands::models::list(&config, json).await,
        None => {
            let outcomes = commands::run::run(config, cli.quiet).await?;
            let tuned = outcomes.iter().filter(|o| o.sweet_spot.is_some()).count();
            info!(models = outcomes.len(), tuned, "Run complete");
            if tuned < outcomes.len() {
                output::print_warning(&format!(
                    "{} of {} model(s) had no usable context size",
                    outcomes.len() - tuned,
                    outcomes.len()
                ));
            }
            Ok(())
        }
    }
}

/// Initialize logging; `RUST_LOG` wins over the configured level
fn init_logging(logging_config: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging_config.level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(logging_config.show_target)
        .with_writer(std::io::stderr);

    match logging_config.format.as_str() {
        "json" => subscriber.json().init(),
        _ => subscriber.init(),
    }
}
