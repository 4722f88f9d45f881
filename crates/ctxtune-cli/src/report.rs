//! CSV report: one row per trial, flushed as soon as the trial is final

use chrono::{DateTime, Local};
use ctxtune_core::{bytes_to_gib, Error, ModelInfo, Reporter, Result, RunMetadata, TrialResult};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const HEADERS: [&str; 18] = [
    "Timestamp",
    "Server_Ver",
    "Model",
    "Model_Hash",
    "Target_Ctx",
    "Actual_Ctx",
    "Actual_Gen_Tokens",
    "Eval_Speed (t/s)",
    "Prompt_Speed (t/s)",
    "Total_Duration (s)",
    "GPU_Percent",
    "GPU_Split_Percent",
    "Sys_RAM_Used_GiB",
    "VRAM_Used_GiB",
    "Layers_GPU",
    "Layers_CPU",
    "Status",
    "Stop_Reason",
];

/// File stem shared by the CSV report and the hardware snapshot
pub fn report_stem(base: &str, started: DateTime<Local>) -> String {
    format!("{}_{}", base, started.format("%Y%m%d_%H%M%S"))
}

/// Writes trial rows to `<dir>/<stem>.csv`
pub struct CsvReporter {
    writer: csv::Writer<File>,
    path: PathBuf,
    server_version: String,
}

impl CsvReporter {
    /// Create the report file and write the header row
    pub fn create(dir: &Path, stem: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.csv", stem));

        let mut writer = csv::Writer::from_path(&path).map_err(csv_error)?;
        writer.write_record(HEADERS).map_err(csv_error)?;
        writer.flush()?;

        Ok(Self {
            writer,
            path,
            server_version: String::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Reporter for CsvReporter {
    fn run_started(&mut self, run: &RunMetadata) -> Result<()> {
        self.server_version = run.server_version.clone().unwrap_or_default();
        Ok(())
    }

    fn trial_recorded(&mut self, model: &ModelInfo, result: &TrialResult) -> Result<()> {
        let row = trial_row(&self.server_version, model, result);
        self.writer.write_record(&row).map_err(csv_error)?;
        self.writer.flush()?;
        debug!(
            path = %self.path.display(),
            context = result.config.target_context_size,
            "Report row written"
        );
        Ok(())
    }
}

/// Render one trial as report cells; unmeasured values are empty
pub fn trial_row(server_version: &str, model: &ModelInfo, result: &TrialResult) -> Vec<String> {
    let record = result.log_record.as_ref();
    let status = result
        .stop_reason
        .as_ref()
        .map(|reason| reason.status())
        .unwrap_or_else(|| "OK".to_string());

    vec![
        result
            .started_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        server_version.to_string(),
        model.name.clone(),
        model.short_digest().unwrap_or_default().to_string(),
        result.config.target_context_size.to_string(),
        opt(result
            .actual_context_size
            .or_else(|| record.and_then(|r| r.context_size_actual))),
        opt(result.actual_generated_tokens),
        fixed(result.eval_speed_tps, 2),
        fixed(result.prompt_speed_tps, 2),
        fixed(result.response_time_seconds, 2),
        fixed(result.peak_gpu_percent, 1),
        fixed(record.and_then(|r| r.split_ratio).map(|ratio| ratio * 100.0), 1),
        fixed(result.sys_ram_spillover_bytes().map(bytes_to_gib), 2),
        fixed(result.vram_used_bytes().map(bytes_to_gib), 2),
        opt(record.and_then(|r| r.layers_on_gpu)),
        opt(record.and_then(|r| r.layers_on_cpu)),
        status,
        result.stop_detail.clone().unwrap_or_default(),
    ]
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn fixed(value: Option<f64>, precision: usize) -> String {
    value
        .map(|v| format!("{:.*}", precision, v))
        .unwrap_or_default()
}

fn csv_error(err: csv::Error) -> Error {
    Error::report(err.to_string())
}
