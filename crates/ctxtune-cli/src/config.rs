//! Command-line overrides layered on top of the loaded configuration

use clap::Args;
use ctxtune_core::{CriteriaConfig, LogMode, SamplerKind, TuneConfig};
use std::path::PathBuf;

/// Settings that can be overridden per invocation
#[derive(Debug, Default, Clone, Args)]
pub struct TuneArgs {
    /// Inference server URL
    #[arg(long, value_name = "URL")]
    pub url: Option<String>,

    /// Model to tune (repeatable)
    #[arg(short, long = "model", value_name = "NAME")]
    pub models: Vec<String>,

    /// Tune every installed model
    #[arg(long, conflicts_with = "models")]
    pub all_models: bool,

    /// First context size to try
    #[arg(long, value_name = "TOKENS")]
    pub start_context: Option<u32>,

    /// Largest context size to try
    #[arg(long, value_name = "TOKENS")]
    pub max_context: Option<u32>,

    /// Context size increment between trials
    #[arg(long, value_name = "TOKENS")]
    pub step_size: Option<u32>,

    /// Tokens generated per trial
    #[arg(long, value_name = "TOKENS")]
    pub tokens: Option<u32>,

    /// Skip the warm-up request before each trial
    #[arg(long)]
    pub no_warmup: bool,

    /// Keep the model loaded between trials
    #[arg(long)]
    pub no_unload: bool,

    /// Minimum GPU share in percent (0 disables)
    #[arg(long, value_name = "PERCENT")]
    pub min_gpu_percent: Option<f64>,

    /// Maximum model memory spilled into system RAM
    #[arg(long, value_name = "GIB")]
    pub max_sys_ram_gb: Option<f64>,

    /// Maximum VRAM in use
    #[arg(long, value_name = "GIB")]
    pub max_vram_gb: Option<f64>,

    /// VRAM that must stay free
    #[arg(long, value_name = "GIB")]
    pub min_free_vram_gb: Option<f64>,

    /// Minimum generation speed
    #[arg(long, value_name = "TPS")]
    pub min_eval_tps: Option<f64>,

    /// Maximum wall-clock time per trial
    #[arg(long, value_name = "SECS")]
    pub max_response_time: Option<f64>,

    /// Minimum fraction of the requested context the server must process
    #[arg(long, value_name = "RATIO")]
    pub min_context_fill: Option<f64>,

    /// Drop every configured limit before applying the ones given here
    #[arg(long)]
    pub no_limits: bool,

    /// Where the inference server writes its log (docker, file, none)
    #[arg(long, value_name = "MODE")]
    pub log_mode: Option<LogMode>,

    /// Container name or log file path
    #[arg(long, value_name = "SOURCE")]
    pub log_source: Option<String>,

    /// Hardware sampler (auto, nvidia, unified, system, none)
    #[arg(long, value_name = "KIND")]
    pub sampler: Option<SamplerKind>,

    /// Directory for report files
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Report file name prefix
    #[arg(long, value_name = "NAME")]
    pub output_name: Option<String>,

    /// Do not write the hardware-spec snapshot
    #[arg(long)]
    pub no_specs: bool,
}

impl TuneArgs {
    /// Apply every flag that was given; untouched settings keep their loaded value
    pub fn apply_to(&self, config: &mut TuneConfig) {
        if let Some(url) = &self.url {
            config.server.url = url.clone();
        }

        if !self.models.is_empty() {
            config.search.models = self.models.clone();
            config.search.all_models = false;
        }
        if self.all_models {
            config.search.all_models = true;
        }

        let search = &mut config.search;
        set(&mut search.start_context, self.start_context);
        set(&mut search.max_context, self.max_context);
        set(&mut search.step_size, self.step_size);
        set(&mut search.tokens_to_generate, self.tokens);
        if self.no_warmup {
            search.warmup = false;
        }
        if self.no_unload {
            search.unload_between_trials = false;
        }

        if self.no_limits {
            config.criteria = CriteriaConfig::unlimited();
        }
        let criteria = &mut config.criteria;
        set_limit(&mut criteria.min_gpu_percent, self.min_gpu_percent);
        set_limit(&mut criteria.max_sys_ram_gb, self.max_sys_ram_gb);
        set_limit(&mut criteria.max_vram_budget_gb, self.max_vram_gb);
        set_limit(&mut criteria.min_free_vram_gb, self.min_free_vram_gb);
        set_limit(&mut criteria.min_eval_tps, self.min_eval_tps);
        set_limit(&mut criteria.max_response_time_secs, self.max_response_time);
        set_limit(&mut criteria.min_context_fill, self.min_context_fill);

        set(&mut config.logs.mode, self.log_mode);
        if let Some(source) = &self.log_source {
            config.logs.source = source.clone();
        }
        set(&mut config.telemetry.sampler, self.sampler);

        if let Some(dir) = &self.output_dir {
            config.output.dir = dir.clone();
        }
        if let Some(name) = &self.output_name {
            config.output.base_filename = name.clone();
        }
        if self.no_specs {
            config.output.write_specs = false;
        }
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn set_limit(slot: &mut Option<f64>, value: Option<f64>) {
    if value.is_some() {
        *slot = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_args_change_nothing() {
        let mut config = TuneConfig::default();
        TuneArgs::default().apply_to(&mut config);
        assert_eq!(config, TuneConfig::default());
    }

    #[test]
    fn test_search_overrides() {
        let mut config = TuneConfig::default();
        config.search.all_models = true;

        let args = TuneArgs {
            models: vec!["llama3:8b".to_string()],
            start_context: Some(2048),
            step_size: Some(1024),
            no_unload: true,
            ..Default::default()
        };
        args.apply_to(&mut config);

        assert_eq!(config.search.models, vec!["llama3:8b".to_string()]);
        assert!(!config.search.all_models);
        assert_eq!(config.search.start_context, 2048);
        assert_eq!(config.search.step_size, 1024);
        assert_eq!(config.search.max_context, 65536);
        assert!(!config.search.unload_between_trials);
        assert!(config.search.warmup);
    }

    #[test]
    fn test_no_limits_then_explicit_limit() {
        let mut config = TuneConfig::default();
        let args = TuneArgs {
            no_limits: true,
            min_eval_tps: Some(10.0),
            ..Default::default()
        };
        args.apply_to(&mut config);

        assert_eq!(config.criteria.min_eval_tps, Some(10.0));
        assert!(config.criteria.max_vram_budget_gb.is_none());
        assert!(config.criteria.max_response_time_secs.is_none());
    }

    #[test]
    fn test_source_and_output_overrides() {
        let mut config = TuneConfig::default();
        let args = TuneArgs {
            log_mode: Some(LogMode::File),
            log_source: Some("/var/log/ollama.log".to_string()),
            sampler: Some(SamplerKind::System),
            output_dir: Some(PathBuf::from("results")),
            no_specs: true,
            ..Default::default()
        };
        args.apply_to(&mut config);

        assert_eq!(config.logs.mode, LogMode::File);
        assert_eq!(config.logs.source, "/var/log/ollama.log");
        assert_eq!(config.telemetry.sampler, SamplerKind::System);
        assert_eq!(config.output.dir, PathBuf::from("results"));
        assert!(!config.output.write_specs);
    }
}
