//! Configuration management for ctxtune
//!
//! Provides a unified configuration system that supports YAML/JSON files,
//! environment variables, and command-line argument overrides.

use crate::criteria::StopCriteria;
use crate::types::{gib_to_bytes, SearchBounds};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "CTXTUNE_CONFIG";

/// One week; longer trial limits are typos
pub const MAX_RESPONSE_TIME_SECS: f64 = 7.0 * 24.0 * 3600.0;

/// Main configuration structure for ctxtune
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuneConfig {
    /// Inference server connection
    pub server: ServerConfig,

    /// Inference server log source
    pub logs: LogsConfig,

    /// Hardware sampling
    pub telemetry: TelemetryConfig,

    /// Search bounds and trial shape
    pub search: SearchConfig,

    /// Stop criteria in user units
    pub criteria: CriteriaConfig,

    /// Report files
    pub output: OutputConfig,

    /// Logging
    pub logging: LoggingConfig,
}

impl TuneConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest)
    /// 2. Configuration file
    /// 3. Defaults (lowest)
    ///
    /// Command-line overrides are applied by the caller afterwards.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // Start with defaults
        builder = builder.add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::from(path.to_path_buf()));
        } else if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(config::File::with_name(&path).required(true));
        } else {
            builder = builder.add_source(config::File::with_name("ctxtune").required(false));
        }

        // CTXTUNE__SEARCH__START_CONTEXT=8192 and friends
        builder = builder.add_source(
            config::Environment::with_prefix("CTXTUNE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let parsed: Self = builder.build()?.try_deserialize()?;
        parsed.validate()?;

        Ok(parsed)
    }

    /// Load configuration from a specific file on top of the defaults
    pub fn load_from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::File::from(path.into()));

        let parsed: Self = builder.build()?.try_deserialize()?;
        parsed.validate()?;

        Ok(parsed)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.logs.validate()?;
        self.telemetry.validate()?;
        self.search.validate()?;
        self.criteria.validate()?;
        Ok(())
    }

    /// Context bounds for every model search
    pub fn bounds(&self) -> SearchBounds {
        SearchBounds::new(
            self.search.start_context,
            self.search.max_context,
            self.search.step_size,
        )
    }

    pub fn stop_criteria(&self) -> StopCriteria {
        self.criteria.to_stop_criteria()
    }

    /// Per-request timeout, never shorter than the response-time limit plus slack
    pub fn request_timeout(&self) -> Duration {
        let floor = self
            .criteria
            .max_response_time_secs
            .filter(|s| s.is_finite() && *s > 0.0)
            .map(|s| s + 60.0)
            .unwrap_or(0.0);
        let secs = (self.server.request_timeout_secs as f64).max(floor);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }
}

/// Inference server connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the inference server
    pub url: String,

    /// Hard limit for one generation request in seconds
    pub request_timeout_secs: u64,

    /// Timeout for metadata and health requests in seconds
    pub probe_timeout_secs: u64,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(crate::Error::config("Server URL cannot be empty"));
        }
        if self.request_timeout_secs == 0 {
            return Err(crate::Error::config("Request timeout must be > 0"));
        }
        Ok(())
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.max(1))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:11434".to_string(),
            request_timeout_secs: 1800,
            probe_timeout_secs: 3,
        }
    }
}

/// Where the inference server writes its log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogMode {
    /// `docker logs` of a container
    Docker,
    /// A log file on the local filesystem
    File,
    /// No log access
    None,
}

impl std::str::FromStr for LogMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "docker" => Ok(LogMode::Docker),
            "file" => Ok(LogMode::File),
            "none" => Ok(LogMode::None),
            _ => Err(format!("Unknown log mode: {}", s)),
        }
    }
}

/// Inference server log source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    pub mode: LogMode,

    /// Container name for docker mode, file path for file mode
    pub source: String,

    /// Attempts at finding a trial's log record after the response arrives
    pub poll_attempts: u32,

    /// Initial delay between attempts; doubles each time
    pub poll_backoff_ms: u64,

    /// Upper bound for one `docker logs` invocation
    pub command_timeout_ms: u64,

    /// Maximum bytes read from a log file per poll
    pub max_read_bytes: u64,
}

impl LogsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.mode != LogMode::None && self.source.trim().is_empty() {
            return Err(crate::Error::config("Log source cannot be empty"));
        }
        if self.poll_attempts == 0 {
            return Err(crate::Error::config("Log poll attempts must be > 0"));
        }
        Ok(())
    }

    /// Source path with `~` expanded
    pub fn expanded_source(&self) -> PathBuf {
        expand_home(&self.source)
    }

    pub fn poll_backoff(&self) -> Duration {
        Duration::from_millis(self.poll_backoff_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms.max(1))
    }
}

impl Default for LogsConfig {
    fn default() -> Self {
        let (mode, source) = default_log_source();
        Self {
            mode,
            source,
            poll_attempts: 5,
            poll_backoff_ms: 250,
            command_timeout_ms: 3000,
            max_read_bytes: 20_000,
        }
    }
}

fn default_log_source() -> (LogMode, String) {
    if cfg!(target_os = "windows") {
        let base = std::env::var("LOCALAPPDATA").unwrap_or_default();
        let path = PathBuf::from(base).join("Ollama").join("server.log");
        (LogMode::File, path.to_string_lossy().into_owned())
    } else if cfg!(target_os = "macos") {
        (LogMode::File, "~/.ollama/logs/server.log".to_string())
    } else {
        (LogMode::Docker, "ollama".to_string())
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~") {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest.trim_start_matches(['/', '\\'])),
            None => PathBuf::from(path),
        },
        None => PathBuf::from(path),
    }
}

/// Which hardware probe to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplerKind {
    /// Pick by platform and available tools
    Auto,
    /// Discrete NVIDIA GPU via nvidia-smi
    Nvidia,
    /// Integrated GPU sharing system memory
    Unified,
    /// System memory only
    System,
    /// No sampling
    None,
}

impl std::str::FromStr for SamplerKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(SamplerKind::Auto),
            "nvidia" => Ok(SamplerKind::Nvidia),
            "unified" => Ok(SamplerKind::Unified),
            "system" => Ok(SamplerKind::System),
            "none" => Ok(SamplerKind::None),
            _ => Err(format!("Unknown sampler: {}", s)),
        }
    }
}

/// Hardware sampling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub sampler: SamplerKind,

    /// Sampling interval in milliseconds
    pub interval_ms: u64,
}

impl TelemetryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(crate::Error::config("Sampling interval must be > 0"));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            sampler: SamplerKind::Auto,
            interval_ms: 250,
        }
    }
}

/// Search bounds and trial shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub start_context: u32,
    pub max_context: u32,
    pub step_size: u32,
    pub tokens_to_generate: u32,

    /// Preload the model before timing
    pub warmup: bool,

    /// Evict the model before every trial so each starts cold
    pub unload_between_trials: bool,

    /// Pause after an unload and between trials, in milliseconds
    pub settle_delay_ms: u64,

    /// Models to test, in order
    pub models: Vec<String>,

    /// Test every installed model
    pub all_models: bool,
}

impl SearchConfig {
    pub fn validate(&self) -> Result<()> {
        SearchBounds::new(self.start_context, self.max_context, self.step_size).validate()?;
        if self.tokens_to_generate == 0 {
            return Err(crate::Error::config("Tokens to generate must be > 0"));
        }
        Ok(())
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            start_context: 4096,
            max_context: 65536,
            step_size: 4096,
            tokens_to_generate: 100,
            warmup: true,
            unload_between_trials: true,
            settle_delay_ms: 1500,
            models: Vec::new(),
            all_models: false,
        }
    }
}

/// Stop criteria in user units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CriteriaConfig {
    pub min_gpu_percent: Option<f64>,
    pub max_sys_ram_gb: Option<f64>,
    pub max_vram_budget_gb: Option<f64>,
    pub min_free_vram_gb: Option<f64>,
    pub min_eval_tps: Option<f64>,
    pub max_response_time_secs: Option<f64>,
    pub min_context_fill: Option<f64>,
}

impl CriteriaConfig {
    /// No limits at all
    pub fn unlimited() -> Self {
        Self {
            min_gpu_percent: None,
            max_sys_ram_gb: None,
            max_vram_budget_gb: None,
            min_free_vram_gb: None,
            min_eval_tps: None,
            max_response_time_secs: None,
            min_context_fill: None,
        }
    }

    /// Reject limits that would convert into nonsense byte or time budgets
    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("max_sys_ram_gb", self.max_sys_ram_gb),
            ("max_vram_budget_gb", self.max_vram_budget_gb),
            ("min_free_vram_gb", self.min_free_vram_gb),
        ];
        for (name, value) in sizes {
            if let Some(gb) = value {
                if !gb.is_finite() || gb < 0.0 {
                    return Err(crate::Error::config(format!(
                        "{} must be a finite value >= 0, got {}",
                        name, gb
                    )));
                }
            }
        }
        if let Some(secs) = self.max_response_time_secs {
            if secs > MAX_RESPONSE_TIME_SECS {
                return Err(crate::Error::config(format!(
                    "max_response_time_secs must be <= {}, got {}",
                    MAX_RESPONSE_TIME_SECS, secs
                )));
            }
        }
        self.to_stop_criteria().validate()
    }

    pub fn to_stop_criteria(&self) -> StopCriteria {
        StopCriteria {
            min_generation_speed_tps: self.min_eval_tps,
            max_vram_budget_bytes: self.max_vram_budget_gb.map(gib_to_bytes),
            min_free_vram_bytes: self.min_free_vram_gb.map(gib_to_bytes),
            max_sys_ram_spillover_bytes: self.max_sys_ram_gb.map(gib_to_bytes),
            max_response_time_seconds: self.max_response_time_secs,
            min_gpu_percent: self.min_gpu_percent,
            min_context_fill: self.min_context_fill,
        }
    }
}

impl Default for CriteriaConfig {
    fn default() -> Self {
        Self {
            // GPU utilisation is not meaningful on unified memory
            min_gpu_percent: Some(if cfg!(target_os = "macos") { 0.0 } else { 90.0 }),
            max_sys_ram_gb: Some(32.0),
            max_vram_budget_gb: Some(24.0),
            min_free_vram_gb: None,
            min_eval_tps: Some(2.0),
            max_response_time_secs: Some(120.0),
            min_context_fill: Some(0.99),
        }
    }
}

/// Report files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory for report files
    pub dir: PathBuf,

    /// File name prefix
    pub base_filename: String,

    /// Also write a hardware-spec snapshot
    pub write_specs: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            base_filename: "ctxtune_result".to_string(),
            write_specs: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive
    pub level: String,

    /// Log format (json or text)
    pub format: String,

    /// Include the event target in log lines
    pub show_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "text".to_string(),
            show_target: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = TuneConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.url, "http://localhost:11434");
        assert_eq!(config.bounds(), SearchBounds::new(4096, 65536, 4096));
        assert_eq!(config.search.tokens_to_generate, 100);
    }

    #[test]
    fn test_config_validation() {
        let mut config = TuneConfig::default();

        config.search.start_context = 70000;
        assert!(config.validate().is_err());
        config.search.start_context = 4096;

        config.search.step_size = 0;
        assert!(config.validate().is_err());
        config.search.step_size = 4096;

        config.search.tokens_to_generate = 0;
        assert!(config.validate().is_err());
        config.search.tokens_to_generate = 100;

        config.criteria.min_eval_tps = Some(-2.0);
        assert!(config.validate().is_err());
        config.criteria.min_eval_tps = Some(2.0);

        config.telemetry.interval_ms = 0;
        assert!(config.validate().is_err());
        config.telemetry.interval_ms = 250;

        config.logs.mode = LogMode::File;
        config.logs.source = String::new();
        assert!(config.validate().is_err());
        config.logs.mode = LogMode::None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_gib_limits_must_be_finite_and_non_negative() {
        let mut config = TuneConfig::default();

        config.criteria.max_vram_budget_gb = Some(-4.0);
        assert!(matches!(config.validate(), Err(crate::Error::InvalidConfiguration(_))));
        config.criteria.max_vram_budget_gb = Some(24.0);

        config.criteria.max_sys_ram_gb = Some(f64::NAN);
        assert!(config.validate().is_err());
        config.criteria.max_sys_ram_gb = Some(32.0);

        config.criteria.min_free_vram_gb = Some(f64::INFINITY);
        assert!(config.validate().is_err());
        config.criteria.min_free_vram_gb = Some(0.0);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_huge_response_time_is_rejected_not_panicking() {
        let mut config = TuneConfig::default();
        config.criteria.max_response_time_secs = Some(1e20);
        assert!(config.validate().is_err());
        // the timeout saturates even for a config that skipped validation
        assert_eq!(config.request_timeout(), Duration::MAX);

        config.criteria.max_response_time_secs = Some(MAX_RESPONSE_TIME_SECS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_criteria_conversion() {
        let criteria = CriteriaConfig {
            max_vram_budget_gb: Some(20.0),
            min_eval_tps: Some(5.0),
            ..CriteriaConfig::unlimited()
        }
        .to_stop_criteria();

        assert_eq!(criteria.max_vram_budget_bytes, Some(20 * crate::GIB));
        assert_eq!(criteria.min_generation_speed_tps, Some(5.0));
        assert!(criteria.max_sys_ram_spillover_bytes.is_none());
        assert!(criteria.min_gpu_percent.is_none());
    }

    #[test]
    fn test_request_timeout_floor() {
        let mut config = TuneConfig::default();
        config.server.request_timeout_secs = 30;
        config.criteria.max_response_time_secs = Some(120.0);
        assert_eq!(config.request_timeout(), Duration::from_secs(180));

        config.criteria.max_response_time_secs = None;
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/var/log/ollama.log"), PathBuf::from("/var/log/ollama.log"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(
                expand_home("~/.ollama/logs/server.log"),
                home.join(".ollama/logs/server.log")
            );
        }
    }

    #[test]
    fn test_parse_modes() {
        assert_eq!("docker".parse::<LogMode>().unwrap(), LogMode::Docker);
        assert_eq!("FILE".parse::<LogMode>().unwrap(), LogMode::File);
        assert!("syslog".parse::<LogMode>().is_err());
        assert_eq!("nvidia".parse::<SamplerKind>().unwrap(), SamplerKind::Nvidia);
        assert!("tpu".parse::<SamplerKind>().is_err());
    }

    #[test]
    fn test_load_from_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "search:\n  start_context: 2048\n  max_context: 8192\n  step_size: 2048\n  models: [\"llama3\"]\ncriteria:\n  min_eval_tps: 5.0\nlogs:\n  mode: none"
        )
        .unwrap();

        let config = TuneConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.bounds(), SearchBounds::new(2048, 8192, 2048));
        assert_eq!(config.search.models, vec!["llama3".to_string()]);
        assert_eq!(config.criteria.min_eval_tps, Some(5.0));
        assert_eq!(config.logs.mode, LogMode::None);
        // untouched sections keep their defaults
        assert_eq!(config.search.tokens_to_generate, 100);
        assert_eq!(config.server.url, "http://localhost:11434");
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "search:\n  start_context: 9000\n  max_context: 4096").unwrap();
        assert!(TuneConfig::load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = TuneConfig::default();

        let yaml = serde_yaml::to_string(&config).unwrap();
        let deserialized: TuneConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config, deserialized);
    }
}
