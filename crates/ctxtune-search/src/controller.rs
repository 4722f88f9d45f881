//! Search controller: drives the per-model forward search

use crate::evaluator::evaluate;
use crate::runner::{RunnerOptions, TrialRunner};
use crate::state::{SearchState, Transition};
use chrono::Utc;
use ctxtune_core::{
    bytes_to_gib, Error, FailureKind, HardwareSampler, InferenceClient, LogSource, ModelInfo,
    ModelOutcome, Reporter, Result, RunMetadata, SearchBounds, StopCriteria, TrialResult,
    TuneConfig,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Runs the search for each selected model in turn
pub struct SearchController {
    runner: TrialRunner,
    criteria: StopCriteria,
    bounds: SearchBounds,
    tokens_to_generate: u32,
    warmup: bool,
    reporters: Vec<Box<dyn Reporter>>,
}

impl SearchController {
    /// Create a controller; bounds and criteria are validated here, before
    /// any trial can run
    pub fn new(runner: TrialRunner, mut criteria: StopCriteria, bounds: SearchBounds) -> Result<Self> {
        bounds.validate()?;
        criteria.validate()?;

        // GPU and CPU share one memory pool, so utilisation is informational only
        if runner.sampler().is_unified_memory() {
            if let Some(percent) = criteria.min_gpu_percent.filter(|p| *p > 0.0) {
                warn!(
                    sampler = runner.sampler().name(),
                    min_gpu_percent = percent,
                    "Unified memory detected; ignoring the GPU utilisation floor"
                );
                criteria.min_gpu_percent = None;
            }
        }

        Ok(Self {
            runner,
            criteria,
            bounds,
            tokens_to_generate: 100,
            warmup: true,
            reporters: Vec::new(),
        })
    }

    /// Wire up a controller from the loaded configuration
    pub fn from_config(
        config: &TuneConfig,
        client: Arc<dyn InferenceClient>,
        sampler: Arc<dyn HardwareSampler>,
        logs: Arc<dyn LogSource>,
    ) -> Result<Self> {
        config.validate()?;
        let runner = TrialRunner::new(client, sampler, logs)
            .with_options(RunnerOptions::from_config(config));

        Ok(Self::new(runner, config.stop_criteria(), config.bounds())?
            .with_tokens_to_generate(config.search.tokens_to_generate)
            .with_warmup(config.search.warmup))
    }

    pub fn with_tokens_to_generate(mut self, tokens: u32) -> Self {
        self.tokens_to_generate = tokens;
        self
    }

    pub fn with_warmup(mut self, enabled: bool) -> Self {
        self.warmup = enabled;
        self
    }

    pub fn with_reporter(mut self, reporter: Box<dyn Reporter>) -> Self {
        self.reporters.push(reporter);
        self
    }

    /// Search every model in order. Stops early only on total loss of the
    /// inference server.
    pub async fn run(&mut self, models: &[ModelInfo]) -> Result<Vec<ModelOutcome>> {
        if models.is_empty() {
            return Err(Error::config("No models selected"));
        }

        let server_version = match self.runner.client().server_version().await {
            Ok(version) => Some(version),
            Err(e) => {
                warn!("Could not read server version: {}", e);
                None
            }
        };

        let run = RunMetadata {
            started_at: Utc::now(),
            server_version,
            tokens_to_generate: self.tokens_to_generate,
            bounds: self.bounds,
        };
        self.notify(|r| r.run_started(&run));

        let mut outcomes = Vec::with_capacity(models.len());
        for model in models {
            let (outcome, server) = self.search(model).await;
            outcomes.push(outcome);
            if let Err(e) = server {
                self.notify(|r| r.run_finished(&outcomes));
                return Err(e);
            }
        }

        self.notify(|r| r.run_finished(&outcomes));
        Ok(outcomes)
    }

    /// Run the forward search for one model
    pub async fn search_model(&mut self, model: &ModelInfo) -> Result<ModelOutcome> {
        let (outcome, server) = self.search(model).await;
        server.map(|()| outcome)
    }

    /// The model's outcome is always produced and reported; the error is set
    /// when the inference server was lost during the search.
    async fn search(&mut self, model: &ModelInfo) -> (ModelOutcome, Result<()>) {
        info!(
            "Searching {} from {} to {} step {}",
            model,
            self.bounds.start_context_size,
            self.bounds.max_context_size,
            self.bounds.step_size
        );
        self.notify(|r| r.model_started(model));

        let mut state = SearchState::new(model.clone(), &self.bounds);

        loop {
            let config = state.trial_config(self.tokens_to_generate, self.warmup);
            let result = self.runner.run(&config).await;
            let decision = evaluate(&result, &self.criteria);
            let (result, transition) = state.advance(result, decision);

            log_trial(&result);
            self.notify(|r| r.trial_recorded(model, &result));

            match transition {
                Transition::Ready(next) => state = next,
                Transition::Terminated(outcome) => {
                    match outcome.sweet_spot_context() {
                        Some(ctx) => info!(
                            "{}: sweet spot {} ({} after {} trials)",
                            model, ctx, outcome.termination, outcome.trials
                        ),
                        None => warn!(
                            "{}: no usable context size ({}: {})",
                            model, outcome.termination, outcome.detail
                        ),
                    }
                    self.notify(|r| r.model_finished(&outcome));

                    let server = match result.failure.as_ref().map(|f| f.kind) {
                        Some(FailureKind::Connection) => self.ensure_server_alive(&result).await,
                        _ => Ok(()),
                    };
                    return (outcome, server);
                }
            }
        }
    }

    /// After a refused connection, tell "this model broke the server" apart
    /// from "the server is gone"
    async fn ensure_server_alive(&self, result: &TrialResult) -> Result<()> {
        match self.runner.client().server_version().await {
            Ok(_) => Ok(()),
            Err(e) => Err(Error::fatal(format!(
                "inference server unreachable after trial at {}: {}",
                result.config.target_context_size, e
            ))),
        }
    }

    fn notify(&mut self, mut event: impl FnMut(&mut Box<dyn Reporter>) -> Result<()>) {
        for reporter in self.reporters.iter_mut() {
            if let Err(e) = event(reporter) {
                warn!("Reporter error: {}", e);
            }
        }
    }
}

fn log_trial(result: &TrialResult) {
    let fmt_f = |v: Option<f64>| v.map_or("-".to_string(), |v| format!("{:.2}", v));
    let fmt_gib = |v: Option<u64>| v.map_or("-".to_string(), |v| format!("{:.2}", bytes_to_gib(v)));

    info!(
        "{} @ {}: eval {} t/s, prompt {} t/s, {} s, gpu {}%, vram {} GiB, spill {} GiB -> {}",
        result.config.model,
        result.config.target_context_size,
        fmt_f(result.eval_speed_tps),
        fmt_f(result.prompt_speed_tps),
        fmt_f(result.response_time_seconds),
        fmt_f(result.gpu_percent()),
        fmt_gib(result.vram_used_bytes()),
        fmt_gib(result.sys_ram_spillover_bytes()),
        result
            .stop_reason
            .map_or_else(|| "continue".to_string(), |r| r.to_string()),
    );
}
