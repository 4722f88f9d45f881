//! Capability traits for ctxtune components
//!
//! These traits are the seams between the search core and the outside world:
//! the inference server, the hardware, the server's log, and whoever persists
//! the results. Adapters for each live in their own crates.

use crate::types::{
    GenerateRequest, GenerateResponse, LogBatch, LogCursor, ModelInfo, ModelOutcome, RunMetadata,
    TelemetrySample, TrialFailure, TrialResult,
};
use crate::Result;
use async_trait::async_trait;

/// Trait for talking to the inference server
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Issue one generation request that fills `context_size` tokens of context
    async fn generate(
        &self,
        request: &GenerateRequest,
    ) -> std::result::Result<GenerateResponse, TrialFailure>;

    /// Force the model into memory at the given context size
    async fn warmup(&self, model: &str, context_size: u32) -> Result<()>;

    /// Evict the model from memory
    async fn unload(&self, model: &str) -> Result<()>;

    /// List installed models
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    /// Server version string; doubles as a health probe
    async fn server_version(&self) -> Result<String>;
}

/// Trait for best-effort hardware sampling
///
/// Implementations must never block longer than one sampling interval and
/// report failures as an empty sample.
#[async_trait]
pub trait HardwareSampler: Send + Sync {
    /// Take one reading
    async fn sample(&self) -> TelemetrySample;

    /// Short name for logging
    fn name(&self) -> &'static str;

    /// Whether GPU and system memory are the same pool
    fn is_unified_memory(&self) -> bool {
        false
    }
}

/// Trait for reading memory-split records from the inference server's log
#[async_trait]
pub trait LogSource: Send + Sync {
    /// A cursor positioned at "now"; later reads only return newer records
    async fn cursor(&self) -> LogCursor;

    /// Records appended since `since`. Never fails: an unreadable source yields
    /// no records and keeps `since`; a restarted one resets the cursor to "now".
    async fn read_records(&self, since: &LogCursor) -> LogBatch;

    /// Short name for logging
    fn name(&self) -> &'static str;
}

/// Trait for persisting and presenting results as they are produced
pub trait Reporter: Send {
    /// Called once before the first trial
    fn run_started(&mut self, _run: &RunMetadata) -> Result<()> {
        Ok(())
    }

    /// Called when the search for a model begins
    fn model_started(&mut self, _model: &ModelInfo) -> Result<()> {
        Ok(())
    }

    /// Called once per finalized trial, in trial order
    fn trial_recorded(&mut self, model: &ModelInfo, result: &TrialResult) -> Result<()>;

    /// Called when the search for a model terminates
    fn model_finished(&mut self, _outcome: &ModelOutcome) -> Result<()> {
        Ok(())
    }

    /// Called once after the last model
    fn run_finished(&mut self, _outcomes: &[ModelOutcome]) -> Result<()> {
        Ok(())
    }
}
