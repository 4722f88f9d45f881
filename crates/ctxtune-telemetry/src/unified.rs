//! Unified-memory sampling for integrated GPUs (Apple silicon)
//!
//! GPU and system memory are one pool here, so "VRAM" is the memory the
//! accelerator reports as in use and the total is physical RAM.

use crate::command;
use crate::sampler::SystemMemory;
use async_trait::async_trait;
use ctxtune_core::{HardwareSampler, TelemetrySample};
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

fn utilization_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""Device Utilization %"\s*=\s*(\d+)"#).expect("valid regex"))
}

fn in_use_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""In use system memory"\s*=\s*(\d+)"#).expect("valid regex"))
}

/// Pull utilisation and in-use memory out of `ioreg` accelerator output.
/// Multiple accelerators are summed for memory and maxed for utilisation.
pub fn parse_ioreg(output: &str) -> (Option<f64>, Option<u64>) {
    let utilization = utilization_re()
        .captures_iter(output)
        .filter_map(|c| c[1].parse::<f64>().ok())
        .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))));

    let in_use = in_use_re()
        .captures_iter(output)
        .filter_map(|c| c[1].parse::<u64>().ok())
        .fold(None, |acc: Option<u64>, v| Some(acc.unwrap_or(0) + v));

    (utilization, in_use)
}

/// Sampler backed by `ioreg -c IOAccelerator`
pub struct UnifiedMemorySampler {
    timeout: Duration,
    memory: SystemMemory,
}

impl UnifiedMemorySampler {
    pub fn new(interval: Duration) -> Self {
        Self {
            timeout: interval,
            memory: SystemMemory::new(),
        }
    }
}

#[async_trait]
impl HardwareSampler for UnifiedMemorySampler {
    async fn sample(&self) -> TelemetrySample {
        let mut sample = TelemetrySample {
            system_ram_used_bytes: self.memory.used_bytes(),
            vram_total_bytes: self.memory.total_bytes(),
            ..TelemetrySample::empty()
        };

        match command::run(
            "ioreg",
            &["-r", "-d", "1", "-w", "0", "-c", "IOAccelerator"],
            self.timeout,
        )
        .await
        {
            Ok(output) => {
                let (utilization, in_use) = parse_ioreg(&output.stdout);
                sample.gpu_utilization_percent = utilization;
                sample.vram_used_bytes = in_use;
            }
            Err(e) => debug!("ioreg sample failed: {}", e),
        }

        sample
    }

    fn name(&self) -> &'static str {
        "unified"
    }

    fn is_unified_memory(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IOREG: &str = r#"+-o AGXAcceleratorG14X  <class AGXAcceleratorG14X, id 0x1000005d8>
    {
      "PerformanceStatistics" = {"In use system memory (driver)"=0,"Alloc system memory"=30000000000,"Tiler Utilization %"=20,"Renderer Utilization %"=40,"Device Utilization %"=42,"In use system memory"=17179869184}
    }
"#;

    #[test]
    fn test_parse_ioreg() {
        let (utilization, in_use) = parse_ioreg(IOREG);
        assert_eq!(utilization, Some(42.0));
        assert_eq!(in_use, Some(17_179_869_184));
    }

    #[test]
    fn test_parse_ioreg_missing_fields() {
        assert_eq!(parse_ioreg("nothing here"), (None, None));
    }

    #[test]
    fn test_unified_flag() {
        let sampler = UnifiedMemorySampler::new(Duration::from_millis(250));
        assert!(sampler.is_unified_memory());
        assert_eq!(sampler.name(), "unified");
    }
}
