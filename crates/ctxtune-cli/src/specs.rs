//! Hardware spec snapshot written next to the CSV report

use chrono::{DateTime, Local};
use ctxtune_core::{bytes_to_gib, Result};
use ctxtune_telemetry::command;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;
use sysinfo::System;
use tracing::debug;

const GPU_QUERY: &str =
    "--query-gpu=index,name,memory.total,power.limit,pcie.link.gen.current,pcie.link.width.current";

/// What the run was measured on
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HardwareSpecs {
    pub os: Option<String>,
    pub kernel: Option<String>,
    pub hostname: Option<String>,
    pub cpu_brand: Option<String>,
    pub cpu_threads: usize,
    pub total_memory_bytes: u64,
    /// Raw `nvidia-smi` rows, one per GPU
    pub gpus: Vec<String>,
}

impl HardwareSpecs {
    /// Collect the snapshot; every probe is best-effort
    pub async fn collect(command_timeout: Duration) -> Self {
        let system = System::new_all();

        let cpu_brand = system
            .cpus()
            .first()
            .map(|cpu| cpu.brand().trim().to_string())
            .filter(|brand| !brand.is_empty());

        let gpus = match command::run(
            "nvidia-smi",
            &[GPU_QUERY, "--format=csv,noheader"],
            command_timeout,
        )
        .await
        {
            Ok(output) => output
                .stdout
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) => {
                debug!(error = %e, "No GPU inventory available");
                Vec::new()
            }
        };

        Self {
            os: System::long_os_version(),
            kernel: System::kernel_version(),
            hostname: System::host_name(),
            cpu_brand,
            cpu_threads: system.cpus().len(),
            total_memory_bytes: system.total_memory(),
            gpus,
        }
    }

    pub fn render(&self, started: DateTime<Local>, server_version: Option<&str>) -> String {
        let unknown = "unknown";
        let mut out = String::new();

        let _ = writeln!(out, "ctxtune {}", env!("CARGO_PKG_VERSION"));
        let _ = writeln!(out, "Run started: {}", started.format("%Y-%m-%d %H:%M:%S %z"));
        let _ = writeln!(out, "Server version: {}", server_version.unwrap_or(unknown));
        let _ = writeln!(out);
        let _ = writeln!(out, "OS: {}", self.os.as_deref().unwrap_or(unknown));
        let _ = writeln!(out, "Kernel: {}", self.kernel.as_deref().unwrap_or(unknown));
        let _ = writeln!(out, "Host: {}", self.hostname.as_deref().unwrap_or(unknown));
        let _ = writeln!(
            out,
            "CPU: {} ({} threads)",
            self.cpu_brand.as_deref().unwrap_or(unknown),
            self.cpu_threads
        );
        let _ = writeln!(out, "Memory: {:.1} GiB", bytes_to_gib(self.total_memory_bytes));
        let _ = writeln!(out);

        if self.gpus.is_empty() {
            let _ = writeln!(out, "GPUs: none detected");
        } else {
            let _ = writeln!(
                out,
                "GPUs (index, name, memory.total, power.limit, pcie.gen, pcie.width):"
            );
            for gpu in &self.gpus {
                let _ = writeln!(out, "  {}", gpu);
            }
        }

        out
    }

    /// Write `<dir>/<stem>_specs.txt`
    pub fn write(
        &self,
        dir: &Path,
        stem: &str,
        started: DateTime<Local>,
        server_version: Option<&str>,
    ) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}_specs.txt", stem));
        std::fs::write(&path, self.render(started, server_version))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ctxtune_core::GIB;

    fn specs() -> HardwareSpecs {
        HardwareSpecs {
            os: Some("Linux 22.04 Ubuntu".to_string()),
            kernel: Some("6.5.0".to_string()),
            hostname: Some("bench".to_string()),
            cpu_brand: Some("AMD Ryzen 9 7950X".to_string()),
            cpu_threads: 32,
            total_memory_bytes: 64 * GIB,
            gpus: vec!["0, NVIDIA GeForce RTX 4090, 24564 MiB, 450.00 W, 4, 16".to_string()],
        }
    }

    #[test]
    fn test_render() {
        let started = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let text = specs().render(started, Some("0.5.1"));

        assert!(text.contains("Run started: 2024-03-09 14:05:07"));
        assert!(text.contains("Server version: 0.5.1"));
        assert!(text.contains("CPU: AMD Ryzen 9 7950X (32 threads)"));
        assert!(text.contains("Memory: 64.0 GiB"));
        assert!(text.contains("  0, NVIDIA GeForce RTX 4090, 24564 MiB"));
    }

    #[test]
    fn test_render_without_gpu() {
        let started = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let text = HardwareSpecs::default().render(started, None);
        assert!(text.contains("Server version: unknown"));
        assert!(text.contains("GPUs: none detected"));
    }

    #[test]
    fn test_write() {
        let dir = tempfile::tempdir().unwrap();
        let started = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let path = specs()
            .write(dir.path(), "ctxtune_result_20240309_140507", started, None)
            .unwrap();

        assert!(path.ends_with("ctxtune_result_20240309_140507_specs.txt"));
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("OS: Linux 22.04 Ubuntu"));
    }

    #[tokio::test]
    async fn test_collect_is_best_effort() {
        let specs = HardwareSpecs::collect(Duration::from_secs(2)).await;
        assert!(specs.cpu_threads > 0);
    }
}
