//! Sampler and log-source selection, plus the trivial implementations

use crate::{
    DockerLogSource, FileLogSource, NvidiaSmiSampler, Result, TelemetryError,
    UnifiedMemorySampler,
};
use async_trait::async_trait;
use ctxtune_core::{
    HardwareSampler, LogBatch, LogCursor, LogMode, LogSource, LogsConfig, SamplerKind,
    TelemetryConfig, TelemetrySample,
};
use std::sync::{Arc, Mutex};
use sysinfo::System;
use tracing::{debug, info, warn};

/// System memory reader shared by every sampler
pub struct SystemMemory {
    system: Mutex<System>,
}

impl SystemMemory {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    /// Bytes of RAM in use, refreshed on every call
    pub fn used_bytes(&self) -> Option<u64> {
        let mut system = self.system.lock().ok()?;
        system.refresh_memory();
        Some(system.used_memory()).filter(|used| *used > 0)
    }

    pub fn total_bytes(&self) -> Option<u64> {
        let mut system = self.system.lock().ok()?;
        system.refresh_memory();
        Some(system.total_memory()).filter(|total| *total > 0)
    }
}

impl Default for SystemMemory {
    fn default() -> Self {
        Self::new()
    }
}

/// Sampler that only reports system RAM
#[derive(Default)]
pub struct SystemSampler {
    memory: SystemMemory,
}

impl SystemSampler {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HardwareSampler for SystemSampler {
    async fn sample(&self) -> TelemetrySample {
        TelemetrySample {
            system_ram_used_bytes: self.memory.used_bytes(),
            ..TelemetrySample::empty()
        }
    }

    fn name(&self) -> &'static str {
        "system"
    }
}

/// Sampler that never measures anything
pub struct NullSampler;

#[async_trait]
impl HardwareSampler for NullSampler {
    async fn sample(&self) -> TelemetrySample {
        TelemetrySample::empty()
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Log source for runs without log access
pub struct NullLogSource;

#[async_trait]
impl LogSource for NullLogSource {
    async fn cursor(&self) -> LogCursor {
        LogCursor::Disabled
    }

    async fn read_records(&self, _since: &LogCursor) -> LogBatch {
        LogBatch::empty(LogCursor::Disabled)
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Pick a hardware sampler. `Auto` prefers unified memory on macOS, then
/// nvidia-smi if it answers, then system memory only.
pub async fn build_sampler(config: &TelemetryConfig) -> Result<Arc<dyn HardwareSampler>> {
    let interval = config.interval();
    let sampler: Arc<dyn HardwareSampler> = match config.sampler {
        SamplerKind::Nvidia => {
            let sampler = NvidiaSmiSampler::new(interval);
            sampler.probe().await?;
            Arc::new(sampler)
        }
        SamplerKind::Unified => {
            if !cfg!(target_os = "macos") {
                return Err(TelemetryError::UnsupportedPlatform(
                    "unified-memory sampling requires macOS".to_string(),
                ));
            }
            Arc::new(UnifiedMemorySampler::new(interval))
        }
        SamplerKind::System => Arc::new(SystemSampler::new()),
        SamplerKind::None => Arc::new(NullSampler),
        SamplerKind::Auto => {
            if cfg!(target_os = "macos") {
                Arc::new(UnifiedMemorySampler::new(interval))
            } else {
                let nvidia = NvidiaSmiSampler::new(interval);
                match nvidia.probe().await {
                    Ok(()) => Arc::new(nvidia),
                    Err(e) => {
                        debug!("nvidia-smi unavailable, sampling system memory only: {}", e);
                        Arc::new(SystemSampler::new())
                    }
                }
            }
        }
    };

    info!("Hardware sampler: {}", sampler.name());
    Ok(sampler)
}

/// Build the log source described by the configuration
pub fn build_log_source(config: &LogsConfig) -> Arc<dyn LogSource> {
    let source: Arc<dyn LogSource> = match config.mode {
        LogMode::Docker => Arc::new(DockerLogSource::new(
            config.source.clone(),
            config.command_timeout(),
        )),
        LogMode::File => {
            let path = config.expanded_source();
            if !path.exists() {
                warn!(
                    "Log file {} does not exist yet; memory split data may be missing",
                    path.display()
                );
            }
            Arc::new(FileLogSource::new(path).with_max_read_bytes(config.max_read_bytes))
        }
        LogMode::None => Arc::new(NullLogSource),
    };

    info!("Log source: {} ({})", source.name(), config.source);
    source
}
