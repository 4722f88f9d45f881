//! Discrete NVIDIA GPU sampling via `nvidia-smi`

use crate::command;
use crate::sampler::SystemMemory;
use crate::Result;
use async_trait::async_trait;
use ctxtune_core::{HardwareSampler, TelemetrySample};
use std::time::Duration;
use tracing::debug;

const QUERY: &str = "--query-gpu=utilization.gpu,memory.used,memory.total,power.draw";
const FORMAT: &str = "--format=csv,noheader,nounits";
const MIB: u64 = 1024 * 1024;

/// Aggregate reading across every visible GPU
#[derive(Debug, Clone, PartialEq)]
pub struct GpuReading {
    /// Busiest GPU
    pub utilization_percent: Option<f64>,
    /// Sum over GPUs
    pub memory_used_bytes: Option<u64>,
    pub memory_total_bytes: Option<u64>,
    pub power_watts: Option<f64>,
}

/// Parse `nvidia-smi` CSV output (one line per GPU, no header, no units)
pub fn parse_query_output(output: &str) -> Option<GpuReading> {
    let mut reading = GpuReading {
        utilization_percent: None,
        memory_used_bytes: None,
        memory_total_bytes: None,
        power_watts: None,
    };
    let mut gpus = 0;

    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() < 3 {
            continue;
        }
        gpus += 1;

        // Unsupported fields come back as "[N/A]" or "[Not Supported]"
        let number = |i: usize| fields.get(i).and_then(|f| f.parse::<f64>().ok());

        if let Some(util) = number(0) {
            reading.utilization_percent =
                Some(reading.utilization_percent.map_or(util, |u| u.max(util)));
        }
        if let Some(used) = number(1) {
            let bytes = (used * MIB as f64) as u64;
            reading.memory_used_bytes = Some(reading.memory_used_bytes.unwrap_or(0) + bytes);
        }
        if let Some(total) = number(2) {
            let bytes = (total * MIB as f64) as u64;
            reading.memory_total_bytes = Some(reading.memory_total_bytes.unwrap_or(0) + bytes);
        }
        if let Some(power) = number(3) {
            reading.power_watts = Some(reading.power_watts.unwrap_or(0.0) + power);
        }
    }

    (gpus > 0).then_some(reading)
}

/// Sampler backed by `nvidia-smi`
pub struct NvidiaSmiSampler {
    binary: String,
    timeout: Duration,
    memory: SystemMemory,
}

impl NvidiaSmiSampler {
    /// Create a sampler whose probes never outlive one sampling interval
    pub fn new(interval: Duration) -> Self {
        Self {
            binary: "nvidia-smi".to_string(),
            timeout: interval,
            memory: SystemMemory::new(),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Check that the tool exists and reports at least one GPU
    pub async fn probe(&self) -> Result<()> {
        // Driver start-up can be slow on the first call
        let timeout = self.timeout.max(Duration::from_secs(5));
        let output = command::run(&self.binary, &[QUERY, FORMAT], timeout).await?;
        parse_query_output(&output.stdout)
            .map(|_| ())
            .ok_or_else(|| crate::TelemetryError::Parse("nvidia-smi reported no GPUs".to_string()))
    }

    async fn query(&self) -> Result<Option<GpuReading>> {
        let output = command::run(&self.binary, &[QUERY, FORMAT], self.timeout).await?;
        Ok(parse_query_output(&output.stdout))
    }
}

#[async_trait]
impl HardwareSampler for NvidiaSmiSampler {
    async fn sample(&self) -> TelemetrySample {
        let mut sample = TelemetrySample {
            system_ram_used_bytes: self.memory.used_bytes(),
            ..TelemetrySample::empty()
        };

        match self.query().await {
            Ok(Some(reading)) => {
                sample.gpu_utilization_percent = reading.utilization_percent;
                sample.vram_used_bytes = reading.memory_used_bytes;
                sample.vram_total_bytes = reading.memory_total_bytes;
                sample.gpu_power_watts = reading.power_watts;
            }
            Ok(None) => debug!("nvidia-smi returned no GPU lines"),
            Err(e) => debug!("nvidia-smi sample failed: {}", e),
        }

        sample
    }

    fn name(&self) -> &'static str {
        "nvidia-smi"
    }
}
