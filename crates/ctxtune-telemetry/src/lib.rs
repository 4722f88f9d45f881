//! # ctxtune-telemetry
//!
//! Telemetry sources for ctxtune trials.
//!
//! This crate provides:
//! - Hardware samplers for discrete NVIDIA GPUs (`nvidia-smi`), unified-memory
//!   machines (`ioreg`), and plain system memory (`sysinfo`)
//! - Log sources that tail the inference server's log from a container or a file
//! - A parser that turns the server's loader lines into [`LogRecord`]s
//!
//! Every source here is best-effort. A failed probe yields an empty sample
//! or an empty batch, never an error.
//!
//! [`LogRecord`]: ctxtune_core::LogRecord

use thiserror::Error;

pub mod command;
pub mod docker;
pub mod file;
pub mod nvidia;
pub mod parser;
pub mod sampler;
pub mod unified;

pub use docker::DockerLogSource;
pub use file::FileLogSource;
pub use nvidia::NvidiaSmiSampler;
pub use parser::{parse_lines, LogParser};
pub use sampler::{build_log_source, build_sampler, NullLogSource, NullSampler, SystemSampler};
pub use unified::UnifiedMemorySampler;

/// Result type for telemetry operations
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Errors raised while setting up or probing a telemetry source
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Tool not available: {0}")]
    ToolUnavailable(String),

    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TelemetryError> for ctxtune_core::Error {
    fn from(err: TelemetryError) -> Self {
        match err {
            TelemetryError::UnsupportedPlatform(msg) | TelemetryError::ToolUnavailable(msg) => {
                ctxtune_core::Error::config(msg)
            }
            TelemetryError::Timeout(msg) => ctxtune_core::Error::timeout(msg),
            other => ctxtune_core::Error::telemetry(other.to_string()),
        }
    }
}
