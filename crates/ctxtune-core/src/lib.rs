//! # ctxtune-core
//!
//! Core types, traits, and utilities for ctxtune - a context-window tuner for
//! locally hosted language models.
//!
//! This crate provides the foundational data structures and interfaces that are
//! shared across all other ctxtune components. It includes:
//!
//! - The trial data model (configs, telemetry samples, log records, results)
//! - Stop criteria and the stop-reason taxonomy
//! - Capability traits for the inference server, hardware sampler, log source
//!   and reporter
//! - Configuration schema and layered loading
//! - Error handling types and utilities

pub mod config;
pub mod criteria;
pub mod error;
pub mod traits;
pub mod types;

#[cfg(any(feature = "mock", test))]
pub mod mock;

// Re-export commonly used types at the crate root
pub use config::{
    CriteriaConfig, LogMode, LogsConfig, LoggingConfig, OutputConfig, SamplerKind, SearchConfig,
    ServerConfig, TelemetryConfig, TuneConfig,
};
pub use criteria::{Criterion, Decision, StopCriteria, StopReason};
pub use error::{Error, Result};
pub use traits::{HardwareSampler, InferenceClient, LogSource, Reporter};
pub use types::{
    bytes_to_gib, gib_to_bytes, model_names_match, FailureKind, GenerateRequest,
    GenerateResponse, LogBatch, LogCursor, LogRecord, ModelInfo, ModelOutcome, RunMetadata,
    SearchBounds, TelemetrySample, TelemetryWindow, TrialConfig, TrialFailure, TrialResult, GIB,
};
