//! Console output for ctxtune

use colored::*;
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use ctxtune_core::{
    bytes_to_gib, ModelInfo, ModelOutcome, Reporter, Result, RunMetadata, StopReason, TrialResult,
};

/// Prints progress while the search runs and a summary table at the end
#[derive(Debug, Default)]
pub struct ConsoleReporter {
    quiet: bool,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only print the final summary
    pub fn quiet() -> Self {
        Self { quiet: true }
    }
}

impl Reporter for ConsoleReporter {
    fn run_started(&mut self, run: &RunMetadata) -> Result<()> {
        if self.quiet {
            return Ok(());
        }
        println!(
            "{} server {} · context {}..{} step {} · {} tokens per trial",
            "▶".cyan().bold(),
            run.server_version.as_deref().unwrap_or("unknown"),
            run.bounds.start_context_size,
            run.bounds.max_context_size,
            run.bounds.step_size,
            run.tokens_to_generate
        );
        Ok(())
    }

    fn model_started(&mut self, model: &ModelInfo) -> Result<()> {
        if !self.quiet {
            println!();
            println!("{}", model.to_string().bold());
        }
        Ok(())
    }

    fn trial_recorded(&mut self, _model: &ModelInfo, result: &TrialResult) -> Result<()> {
        if self.quiet {
            return Ok(());
        }
        let status = trial_status(result);
        let status = if result.stop_reason.as_ref().map_or(false, StopReason::is_violation) {
            status.red().bold()
        } else {
            status.green().bold()
        };
        println!("  {} {}", trial_line(result), status);
        Ok(())
    }

    fn model_finished(&mut self, outcome: &ModelOutcome) -> Result<()> {
        if self.quiet {
            return Ok(());
        }
        match outcome.sweet_spot_context() {
            Some(ctx) => println!(
                "  {} sweet spot {} ({})",
                "✓".green().bold(),
                ctx.to_string().green().bold(),
                outcome.detail
            ),
            None => println!(
                "  {} no usable context size ({})",
                "✗".red().bold(),
                outcome.detail
            ),
        }
        Ok(())
    }

    fn run_finished(&mut self, outcomes: &[ModelOutcome]) -> Result<()> {
        if !outcomes.is_empty() {
            println!();
            println!("{}", summary_table(outcomes));
        }
        Ok(())
    }
}

/// Status cell for a trial: `OK` unless the trial stopped the search
pub fn trial_status(result: &TrialResult) -> String {
    result
        .stop_reason
        .as_ref()
        .map(|reason| reason.status())
        .unwrap_or_else(|| "OK".to_string())
}

/// One progress line, without the status
pub fn trial_line(result: &TrialResult) -> String {
    let ctx = format!("ctx {:>6}", result.config.target_context_size);
    if let Some(failure) = &result.failure {
        return format!("{} │ {}", ctx, failure);
    }

    format!(
        "{} │ {} t/s │ {} tok │ {} │ VRAM {} │ RAM+ {} │ GPU {}",
        ctx,
        or_dash(result.eval_speed_tps.map(|v| format!("{:6.2}", v))),
        or_dash(result.actual_generated_tokens.map(|v| format!("{:>4}", v))),
        or_dash(result.response_time_seconds.map(|v| format!("{:6.1}s", v))),
        or_dash(result.vram_used_bytes().map(format_gib)),
        or_dash(result.sys_ram_spillover_bytes().map(format_gib)),
        or_dash(result.gpu_percent().map(|v| format!("{:.0}%", v))),
    )
}

/// Per-model summary
pub fn summary_table(outcomes: &[ModelOutcome]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(
        ["Model", "Trials", "Sweet spot", "Eval t/s", "VRAM", "Stopped by"]
            .into_iter()
            .map(|h| Cell::new(h).add_attribute(Attribute::Bold).fg(Color::Cyan)),
    );

    for outcome in outcomes {
        let best = outcome.sweet_spot.as_ref();
        let sweet_spot = match outcome.sweet_spot_context() {
            Some(ctx) => Cell::new(ctx).fg(Color::Green),
            None => Cell::new("none").fg(Color::Red),
        };
        table.add_row(vec![
            Cell::new(&outcome.model),
            Cell::new(outcome.trials),
            sweet_spot,
            Cell::new(or_dash(
                best.and_then(|r| r.eval_speed_tps).map(|v| format!("{:.2}", v)),
            )),
            Cell::new(or_dash(best.and_then(TrialResult::vram_used_bytes).map(format_gib))),
            Cell::new(&outcome.termination),
        ]);
    }

    table
}

/// Installed models
pub fn models_table(models: &[ModelInfo]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(
        ["Model", "Digest", "Size"]
            .into_iter()
            .map(|h| Cell::new(h).add_attribute(Attribute::Bold).fg(Color::Cyan)),
    );
    for model in models {
        table.add_row(vec![
            model.name.clone(),
            model.short_digest().unwrap_or("-").to_string(),
            or_dash(model.size_bytes.map(format_gib)),
        ]);
    }

    table
}

/// Print a warning to stderr
pub fn print_warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow().bold(), message.yellow());
}

/// Print an error to stderr
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message.red());
}

/// Print an informational line
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

pub fn format_gib(bytes: u64) -> String {
    format!("{:.2} GiB", bytes_to_gib(bytes))
}

fn or_dash(value: Option<String>) -> String {
    value.unwrap_or_else(|| "-".to_string())
}
