//! Core type definitions for ctxtune
//!
//! Everything a trial produces is modelled here. Metrics that may be missing are
//! `Option`s rather than zero sentinels so that consumers can tell "not measured"
//! from "measured as zero".

use crate::criteria::StopReason;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Bytes in one GiB
pub const GIB: u64 = 1024 * 1024 * 1024;

/// Convert GiB to bytes, clamping negative values to zero
pub fn gib_to_bytes(gib: f64) -> u64 {
    if gib.is_nan() || gib <= 0.0 {
        return 0;
    }
    (gib * GIB as f64).round() as u64
}

/// Convert bytes to GiB
pub fn bytes_to_gib(bytes: u64) -> f64 {
    bytes as f64 / GIB as f64
}

/// Compare two model identifiers, treating a missing tag as `:latest`
pub fn model_names_match(a: &str, b: &str) -> bool {
    fn normalize(name: &str) -> &str {
        name.strip_suffix(":latest").unwrap_or(name)
    }
    normalize(a.trim()) == normalize(b.trim())
}

/// An installed model as reported by the inference server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model identifier, e.g. `llama3:8b`
    pub name: String,

    /// Content digest of the model weights
    pub digest: Option<String>,

    /// On-disk size in bytes
    pub size_bytes: Option<u64>,
}

impl ModelInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            digest: None,
            size_bytes: None,
        }
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    /// First 12 characters of the digest, without any `sha256:` prefix
    pub fn short_digest(&self) -> Option<&str> {
        self.digest.as_deref().map(|d| {
            let d = d.strip_prefix("sha256:").unwrap_or(d);
            let end = d.char_indices().nth(12).map_or(d.len(), |(i, _)| i);
            &d[..end]
        })
    }
}

impl fmt::Display for ModelInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.short_digest() {
            Some(digest) => write!(f, "{} ({})", self.name, digest),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Context-size bounds for one model search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchBounds {
    pub start_context_size: u32,
    pub max_context_size: u32,
    pub step_size: u32,
}

impl SearchBounds {
    pub fn new(start_context_size: u32, max_context_size: u32, step_size: u32) -> Self {
        Self {
            start_context_size,
            max_context_size,
            step_size,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.step_size == 0 {
            return Err(Error::config("Step size must be > 0"));
        }
        if self.start_context_size == 0 {
            return Err(Error::config("Start context must be > 0"));
        }
        if self.start_context_size > self.max_context_size {
            return Err(Error::config(format!(
                "Start context {} exceeds max context {}",
                self.start_context_size, self.max_context_size
            )));
        }
        Ok(())
    }

    /// Context sizes a search would visit if no criterion ever fired
    pub fn planned_sizes(&self) -> Vec<u32> {
        let mut sizes = Vec::new();
        if self.step_size == 0 {
            return sizes;
        }
        let mut current = self.start_context_size;
        while current <= self.max_context_size {
            sizes.push(current);
            match current.checked_add(self.step_size) {
                Some(next) => current = next,
                None => break,
            }
        }
        sizes
    }
}

/// Parameters of a single benchmark trial
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialConfig {
    pub model: String,
    pub target_context_size: u32,
    pub tokens_to_generate: u32,
    pub warmup_enabled: bool,
}

impl TrialConfig {
    pub fn new(model: impl Into<String>, target_context_size: u32, tokens_to_generate: u32) -> Self {
        Self {
            model: model.into(),
            target_context_size,
            tokens_to_generate,
            warmup_enabled: true,
        }
    }

    pub fn with_warmup(mut self, enabled: bool) -> Self {
        self.warmup_enabled = enabled;
        self
    }

    /// The timed generation request for this trial
    pub fn generate_request(&self) -> GenerateRequest {
        GenerateRequest {
            model: self.model.clone(),
            context_size: self.target_context_size,
            max_tokens: self.tokens_to_generate,
        }
    }
}

/// A generation call against the inference server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub context_size: u32,
    pub max_tokens: u32,
}

/// Token counts and timings reported by the inference server itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub response_text: String,
    pub prompt_tokens: u64,
    pub prompt_time: Duration,
    pub generation_tokens: u64,
    pub generation_time: Duration,
    /// Server-side total, including model load
    pub total_time: Option<Duration>,
}

impl GenerateResponse {
    /// Prompt ingestion throughput in tokens per second
    pub fn prompt_speed_tps(&self) -> Option<f64> {
        rate(self.prompt_tokens, self.prompt_time)
    }

    /// Generation throughput in tokens per second
    pub fn eval_speed_tps(&self) -> Option<f64> {
        rate(self.generation_tokens, self.generation_time)
    }
}

fn rate(tokens: u64, elapsed: Duration) -> Option<f64> {
    let secs = elapsed.as_secs_f64();
    (secs > 0.0).then(|| tokens as f64 / secs)
}

/// Why a generation request did not produce a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Connection refused or reset
    Connection,
    /// The per-request timeout elapsed
    Timeout,
    /// The server answered with a non-success status
    ServerError(u16),
    /// The response body could not be understood
    InvalidResponse,
}

impl FailureKind {
    /// Failures that say nothing about the server's health
    pub fn is_connectivity(&self) -> bool {
        matches!(self, FailureKind::Connection | FailureKind::Timeout)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Connection => write!(f, "connection"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::ServerError(status) => write!(f, "http {}", status),
            FailureKind::InvalidResponse => write!(f, "invalid response"),
        }
    }
}

/// A failed generation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TrialFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for TrialFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TrialFailure {}

/// One hardware reading. Every field is best-effort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub timestamp: DateTime<Utc>,
    pub gpu_utilization_percent: Option<f64>,
    pub vram_used_bytes: Option<u64>,
    pub vram_total_bytes: Option<u64>,
    pub system_ram_used_bytes: Option<u64>,
    pub gpu_power_watts: Option<f64>,
}

impl TelemetrySample {
    /// A sample with nothing measured
    pub fn empty() -> Self {
        Self {
            timestamp: Utc::now(),
            gpu_utilization_percent: None,
            vram_used_bytes: None,
            vram_total_bytes: None,
            system_ram_used_bytes: None,
            gpu_power_watts: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.gpu_utilization_percent.is_none()
            && self.vram_used_bytes.is_none()
            && self.vram_total_bytes.is_none()
            && self.system_ram_used_bytes.is_none()
            && self.gpu_power_watts.is_none()
    }
}

/// Peak values over the samples taken during a request window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryWindow {
    pub sample_count: usize,
    pub peak_gpu_percent: Option<f64>,
    pub peak_vram_bytes: Option<u64>,
    pub vram_total_bytes: Option<u64>,
    pub peak_sys_ram_bytes: Option<u64>,
    pub peak_power_watts: Option<f64>,
}

impl TelemetryWindow {
    pub fn from_samples(samples: &[TelemetrySample]) -> Self {
        fn max_f(acc: Option<f64>, v: Option<f64>) -> Option<f64> {
            match (acc, v) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            }
        }
        fn max_u(acc: Option<u64>, v: Option<u64>) -> Option<u64> {
            match (acc, v) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            }
        }

        samples.iter().fold(
            Self {
                sample_count: samples.len(),
                ..Self::default()
            },
            |w, s| Self {
                sample_count: w.sample_count,
                peak_gpu_percent: max_f(w.peak_gpu_percent, s.gpu_utilization_percent),
                peak_vram_bytes: max_u(w.peak_vram_bytes, s.vram_used_bytes),
                vram_total_bytes: max_u(w.vram_total_bytes, s.vram_total_bytes),
                peak_sys_ram_bytes: max_u(w.peak_sys_ram_bytes, s.system_ram_used_bytes),
                peak_power_watts: max_f(w.peak_power_watts, s.gpu_power_watts),
            },
        )
    }
}

/// A memory-split record parsed from the inference server's log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: Option<DateTime<Utc>>,
    pub model: String,
    pub context_size_requested: Option<u32>,
    pub context_size_actual: Option<u32>,
    pub layers_on_gpu: Option<u32>,
    pub layers_on_cpu: Option<u32>,
    pub vram_bytes: Option<u64>,
    /// Total runner footprint (GPU + CPU)
    pub total_bytes: Option<u64>,
    /// Fraction of the footprint resident in VRAM, 0..=1
    pub split_ratio: Option<f64>,
}

impl LogRecord {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            timestamp: None,
            model: model.into(),
            context_size_requested: None,
            context_size_actual: None,
            layers_on_gpu: None,
            layers_on_cpu: None,
            vram_bytes: None,
            total_bytes: None,
            split_ratio: None,
        }
    }

    /// Set the memory split and derive the ratio
    pub fn with_memory(mut self, total_bytes: u64, vram_bytes: u64) -> Self {
        self.total_bytes = Some(total_bytes);
        self.vram_bytes = Some(vram_bytes);
        self.split_ratio = (total_bytes > 0).then(|| vram_bytes as f64 / total_bytes as f64);
        self
    }

    /// Bytes of the runner footprint that did not fit in VRAM
    pub fn spillover_bytes(&self) -> Option<u64> {
        Some(self.total_bytes?.saturating_sub(self.vram_bytes?))
    }

    /// Whether this record describes the given trial. A record without a
    /// requested context size is accepted on model name alone. Parallel
    /// runners log the per-slot context times the slot count, so any whole
    /// multiple of the trial size also matches.
    pub fn matches(&self, model: &str, context_size: u32) -> bool {
        model_names_match(&self.model, model)
            && self.context_size_requested.map_or(true, |ctx| {
                ctx == context_size || (context_size > 0 && ctx % context_size == 0)
            })
    }
}

/// Read position in a log source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogCursor {
    /// No log source configured
    Disabled,
    /// Byte offset into a log file
    File { offset: u64 },
    /// Timestamp of the last container log line consumed
    Container { since: DateTime<Utc> },
}

/// Records read since a cursor, plus the cursor to use next time
#[derive(Debug, Clone, PartialEq)]
pub struct LogBatch {
    pub records: Vec<LogRecord>,
    pub next: LogCursor,
}

impl LogBatch {
    pub fn empty(next: LogCursor) -> Self {
        Self {
            records: Vec::new(),
            next,
        }
    }
}

/// The outcome of one trial. Performance fields are `None` when the trial failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub config: TrialConfig,
    pub started_at: DateTime<Utc>,
    pub actual_context_size: Option<u32>,
    pub actual_generated_tokens: Option<u64>,
    pub eval_speed_tps: Option<f64>,
    pub prompt_speed_tps: Option<f64>,
    pub response_time_seconds: Option<f64>,
    pub peak_gpu_percent: Option<f64>,
    pub peak_vram_bytes: Option<u64>,
    pub vram_total_bytes: Option<u64>,
    pub peak_sys_ram_bytes: Option<u64>,
    /// System RAM in use before the model was loaded
    pub baseline_sys_ram_bytes: Option<u64>,
    pub log_record: Option<LogRecord>,
    pub failure: Option<TrialFailure>,
    pub stop_reason: Option<StopReason>,
    pub stop_detail: Option<String>,
}

impl TrialResult {
    /// A result with no measurements yet
    pub fn new(config: TrialConfig) -> Self {
        Self {
            config,
            started_at: Utc::now(),
            actual_context_size: None,
            actual_generated_tokens: None,
            eval_speed_tps: None,
            prompt_speed_tps: None,
            response_time_seconds: None,
            peak_gpu_percent: None,
            peak_vram_bytes: None,
            vram_total_bytes: None,
            peak_sys_ram_bytes: None,
            baseline_sys_ram_bytes: None,
            log_record: None,
            failure: None,
            stop_reason: None,
            stop_detail: None,
        }
    }

    /// A failed trial: stop reason set, performance fields left empty
    pub fn failed(config: TrialConfig, failure: TrialFailure) -> Self {
        let mut result = Self::new(config);
        result.stop_reason = Some(StopReason::TrialFailed(failure.kind));
        result.stop_detail = Some(failure.to_string());
        result.failure = Some(failure);
        result
    }

    pub fn with_response(mut self, response: &GenerateResponse, elapsed: Duration) -> Self {
        self.actual_context_size = Some(u32::try_from(response.prompt_tokens).unwrap_or(u32::MAX));
        self.actual_generated_tokens = Some(response.generation_tokens);
        self.eval_speed_tps = response.eval_speed_tps();
        self.prompt_speed_tps = response.prompt_speed_tps();
        self.response_time_seconds = Some(elapsed.as_secs_f64());
        self
    }

    pub fn with_telemetry(mut self, window: &TelemetryWindow) -> Self {
        self.peak_gpu_percent = window.peak_gpu_percent;
        self.peak_vram_bytes = window.peak_vram_bytes;
        self.vram_total_bytes = window.vram_total_bytes;
        self.peak_sys_ram_bytes = window.peak_sys_ram_bytes;
        self
    }

    /// Attach the reason the search stopped at this trial
    pub fn with_stop(mut self, reason: StopReason, detail: impl Into<String>) -> Self {
        self.stop_reason = Some(reason);
        self.stop_detail = Some(detail.into());
        self
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// VRAM in use: hardware peak first, log record second
    pub fn vram_used_bytes(&self) -> Option<u64> {
        self.peak_vram_bytes
            .or_else(|| self.log_record.as_ref().and_then(|r| r.vram_bytes))
    }

    /// Model memory that spilled into system RAM: log split first, RAM growth second
    pub fn sys_ram_spillover_bytes(&self) -> Option<u64> {
        self.log_record
            .as_ref()
            .and_then(LogRecord::spillover_bytes)
            .or_else(|| {
                Some(
                    self.peak_sys_ram_bytes?
                        .saturating_sub(self.baseline_sys_ram_bytes?),
                )
            })
    }

    /// GPU percentage: hardware utilisation first, log split ratio second
    pub fn gpu_percent(&self) -> Option<f64> {
        self.peak_gpu_percent.or_else(|| {
            self.log_record
                .as_ref()
                .and_then(|r| r.split_ratio)
                .map(|ratio| ratio * 100.0)
        })
    }
}

/// How the search for one model ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelOutcome {
    pub model: ModelInfo,
    pub trials: usize,
    /// Last trial that violated nothing
    pub sweet_spot: Option<TrialResult>,
    pub termination: StopReason,
    pub detail: String,
}

impl ModelOutcome {
    pub fn sweet_spot_context(&self) -> Option<u32> {
        self.sweet_spot
            .as_ref()
            .map(|r| r.config.target_context_size)
    }
}

/// Run-wide metadata handed to reporters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub started_at: DateTime<Utc>,
    pub server_version: Option<String>,
    pub tokens_to_generate: u32,
    pub bounds: SearchBounds,
}
