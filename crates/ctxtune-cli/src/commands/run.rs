//! The default command: tune every selected model

use crate::commands::models::select_models;
use crate::output::{self, ConsoleReporter};
use crate::report::{report_stem, CsvReporter};
use crate::specs::HardwareSpecs;
use anyhow::{Context, Result};
use chrono::Local;
use ctxtune_core::{HardwareSampler, InferenceClient, LogSource, ModelOutcome, TuneConfig};
use ctxtune_runtime::OllamaClient;
use ctxtune_search::SearchController;
use ctxtune_telemetry::{build_log_source, build_sampler};
use std::sync::Arc;
use tracing::{info, warn};

/// Wire up the real adapters and run the search
pub async fn run(config: TuneConfig, quiet: bool) -> Result<Vec<ModelOutcome>> {
    let client = OllamaClient::from_config(&config.server, config.request_timeout())
        .context("Invalid server URL")?;
    let sampler = build_sampler(&config.telemetry)
        .await
        .context("Failed to set up hardware sampling")?;
    let logs = build_log_source(&config.logs);
    info!(sampler = sampler.name(), logs = logs.name(), "Telemetry sources ready");

    execute(config, Arc::new(client), sampler, logs, quiet).await
}

/// Select models, open the reports and drive the controller
pub async fn execute(
    config: TuneConfig,
    client: Arc<dyn InferenceClient>,
    sampler: Arc<dyn HardwareSampler>,
    logs: Arc<dyn LogSource>,
    quiet: bool,
) -> Result<Vec<ModelOutcome>> {
    let models = select_models(client.as_ref(), &config.search)
        .await
        .context("Failed to select models")?;

    let started = Local::now();
    let stem = report_stem(&config.output.base_filename, started);

    let csv = CsvReporter::create(&config.output.dir, &stem)
        .with_context(|| format!("Failed to create report in {}", config.output.dir.display()))?;
    if !quiet {
        output::print_info(&format!("Writing results to {}", csv.path().display()));
    }

    if config.output.write_specs {
        let server_version = client.server_version().await.ok();
        let specs = HardwareSpecs::collect(config.logs.command_timeout()).await;
        match specs.write(&config.output.dir, &stem, started, server_version.as_deref()) {
            Ok(path) => info!(path = %path.display(), "Hardware specs written"),
            Err(e) => warn!(error = %e, "Could not write hardware specs"),
        }
    }

    let console = if quiet {
        ConsoleReporter::quiet()
    } else {
        ConsoleReporter::new()
    };

    let mut controller = SearchController::from_config(&config, client, sampler, logs)
        .context("Invalid search configuration")?
        .with_reporter(Box::new(console))
        .with_reporter(Box::new(csv));

    let outcomes = controller.run(&models).await?;
    Ok(outcomes)
}
