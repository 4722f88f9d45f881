//! Stop criteria, stop reasons, and evaluator decisions

use crate::types::FailureKind;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// User thresholds. Every field is optional; unset means no limit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StopCriteria {
    /// Minimum generation speed in tokens per second
    pub min_generation_speed_tps: Option<f64>,

    /// Maximum VRAM in use
    pub max_vram_budget_bytes: Option<u64>,

    /// VRAM that must stay free (needs total VRAM from telemetry)
    pub min_free_vram_bytes: Option<u64>,

    /// Maximum model memory spilled into system RAM
    pub max_sys_ram_spillover_bytes: Option<u64>,

    /// Maximum wall-clock response time
    pub max_response_time_seconds: Option<f64>,

    /// Minimum GPU percentage; zero disables the check
    pub min_gpu_percent: Option<f64>,

    /// Minimum fraction of the requested context the server actually processed
    pub min_context_fill: Option<f64>,
}

impl StopCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_generation_speed(mut self, tps: f64) -> Self {
        self.min_generation_speed_tps = Some(tps);
        self
    }

    pub fn with_max_vram(mut self, bytes: u64) -> Self {
        self.max_vram_budget_bytes = Some(bytes);
        self
    }

    pub fn with_min_free_vram(mut self, bytes: u64) -> Self {
        self.min_free_vram_bytes = Some(bytes);
        self
    }

    pub fn with_max_sys_ram_spillover(mut self, bytes: u64) -> Self {
        self.max_sys_ram_spillover_bytes = Some(bytes);
        self
    }

    pub fn with_max_response_time(mut self, seconds: f64) -> Self {
        self.max_response_time_seconds = Some(seconds);
        self
    }

    pub fn with_min_gpu_percent(mut self, percent: f64) -> Self {
        self.min_gpu_percent = Some(percent);
        self
    }

    pub fn with_min_context_fill(mut self, ratio: f64) -> Self {
        self.min_context_fill = Some(ratio);
        self
    }

    /// Reject thresholds that can never be meaningful
    pub fn validate(&self) -> Result<()> {
        let floats = [
            ("min generation speed", self.min_generation_speed_tps),
            ("max response time", self.max_response_time_seconds),
            ("min GPU percent", self.min_gpu_percent),
            ("min context fill", self.min_context_fill),
        ];
        for (name, value) in floats {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(Error::config(format!(
                        "{} must be a finite value >= 0, got {}",
                        name, v
                    )));
                }
            }
        }
        if matches!(self.min_gpu_percent, Some(p) if p > 100.0) {
            return Err(Error::config("min GPU percent must be <= 100"));
        }
        if matches!(self.min_context_fill, Some(r) if r > 1.0) {
            return Err(Error::config("min context fill must be <= 1.0"));
        }
        Ok(())
    }
}

/// The individual checks, in evaluation precedence order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Criterion {
    TrialFailure,
    VramBudget,
    SysRamSpillover,
    GenerationSpeed,
    ResponseTime,
    GpuUtilization,
    ContextFill,
}

impl Criterion {
    /// Most safety-critical first
    pub const PRECEDENCE: [Criterion; 7] = [
        Criterion::TrialFailure,
        Criterion::VramBudget,
        Criterion::SysRamSpillover,
        Criterion::GenerationSpeed,
        Criterion::ResponseTime,
        Criterion::GpuUtilization,
        Criterion::ContextFill,
    ];
}

/// Why the search for a model ended at a given trial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    TrialFailed(FailureKind),
    VramBudget,
    SysRamSpillover,
    SpeedBelowMinimum,
    ResponseTimeExceeded,
    GpuBelowMinimum,
    ContextTruncated,
    MaxContextReached,
}

impl StopReason {
    /// Stable machine-readable name
    pub fn name(&self) -> &'static str {
        match self {
            StopReason::TrialFailed(_) => "trial failed",
            StopReason::VramBudget => "vram-budget",
            StopReason::SysRamSpillover => "sys-ram-spillover",
            StopReason::SpeedBelowMinimum => "speed-below-minimum",
            StopReason::ResponseTimeExceeded => "response-time-exceeded",
            StopReason::GpuBelowMinimum => "gpu-below-minimum",
            StopReason::ContextTruncated => "context-truncated",
            StopReason::MaxContextReached => "max context reached",
        }
    }

    /// Report status column value
    pub fn status(&self) -> String {
        match self {
            StopReason::TrialFailed(FailureKind::ServerError(code)) => format!("FAIL_{}", code),
            StopReason::TrialFailed(FailureKind::Timeout) => "FAIL_TIMEOUT".to_string(),
            StopReason::TrialFailed(_) => "FAIL_CRASH".to_string(),
            StopReason::VramBudget => "FAIL_VRAM".to_string(),
            StopReason::SysRamSpillover => "FAIL_RAM".to_string(),
            StopReason::SpeedBelowMinimum => "FAIL_SPEED".to_string(),
            StopReason::ResponseTimeExceeded => "FAIL_TIME".to_string(),
            StopReason::GpuBelowMinimum => "FAIL_GPU_%".to_string(),
            StopReason::ContextTruncated => "TRUNCATED".to_string(),
            StopReason::MaxContextReached => "OK".to_string(),
        }
    }

    /// Whether the trial carrying this reason still counts as good
    pub fn is_violation(&self) -> bool {
        !matches!(self, StopReason::MaxContextReached)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of evaluating one trial against the stop criteria
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Continue,
    Stop { reason: StopReason, detail: String },
}

impl Decision {
    pub fn stop(reason: StopReason, detail: impl Into<String>) -> Self {
        Decision::Stop {
            reason,
            detail: detail.into(),
        }
    }

    pub fn is_stop(&self) -> bool {
        matches!(self, Decision::Stop { .. })
    }

    pub fn reason(&self) -> Option<StopReason> {
        match self {
            Decision::Continue => None,
            Decision::Stop { reason, .. } => Some(*reason),
        }
    }
}
