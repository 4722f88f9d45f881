//! Mock implementations for testing and development
//!
//! Everything here is deterministic: responses are scripted per context size,
//! samples repeat in a fixed cycle, and reporters keep events in memory.

use crate::traits::{HardwareSampler, InferenceClient, LogSource, Reporter};
use crate::types::{
    GenerateRequest, GenerateResponse, LogBatch, LogCursor, LogRecord, ModelInfo, ModelOutcome,
    RunMetadata, TelemetrySample, TrialFailure, TrialResult,
};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Build a response that processed the whole prompt at the given speeds
pub fn response_at(prompt_tokens: u64, generation_tokens: u64, eval_tps: f64) -> GenerateResponse {
    let generation_secs = if eval_tps > 0.0 {
        generation_tokens as f64 / eval_tps
    } else {
        0.0
    };
    GenerateResponse {
        response_text: "ok".to_string(),
        prompt_tokens,
        prompt_time: Duration::from_millis(500),
        generation_tokens,
        generation_time: Duration::from_secs_f64(generation_secs),
        total_time: None,
    }
}

type Script = std::result::Result<GenerateResponse, TrialFailure>;

/// Inference client with per-context-size scripted outcomes
pub struct ScriptedClient {
    models: Vec<ModelInfo>,
    version: String,
    scripts: HashMap<u32, Script>,
    default_eval_tps: f64,
    latency: Duration,
    reachable: AtomicBool,
    requests: Mutex<Vec<GenerateRequest>>,
    warmups: Mutex<Vec<(String, u32)>>,
    unloads: AtomicUsize,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self {
            models: Vec::new(),
            version: "0.0.0-mock".to_string(),
            scripts: HashMap::new(),
            default_eval_tps: 50.0,
            latency: Duration::ZERO,
            reachable: AtomicBool::new(true),
            requests: Mutex::new(Vec::new()),
            warmups: Mutex::new(Vec::new()),
            unloads: AtomicUsize::new(0),
        }
    }

    pub fn with_model(mut self, model: ModelInfo) -> Self {
        self.models.push(model);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Answer requests at `context_size` with this generation speed
    pub fn with_speed(mut self, context_size: u32, eval_tps: f64) -> Self {
        self.scripts.insert(
            context_size,
            Ok(response_at(context_size as u64, 100, eval_tps)),
        );
        self
    }

    pub fn with_response(mut self, context_size: u32, response: GenerateResponse) -> Self {
        self.scripts.insert(context_size, Ok(response));
        self
    }

    pub fn with_failure(mut self, context_size: u32, failure: TrialFailure) -> Self {
        self.scripts.insert(context_size, Err(failure));
        self
    }

    /// Delay every generation request by this much
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Simulate the server going away entirely
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Generation requests received so far, in order
    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn warmups(&self) -> Vec<(String, u32)> {
        self.warmups.lock().map(|w| w.clone()).unwrap_or_default()
    }

    pub fn unload_count(&self) -> usize {
        self.unloads.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> Result<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::network("connection refused"))
        }
    }
}

impl Default for ScriptedClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InferenceClient for ScriptedClient {
    async fn generate(
        &self,
        request: &GenerateRequest,
    ) -> std::result::Result<GenerateResponse, TrialFailure> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(TrialFailure::new(
                crate::FailureKind::Connection,
                "connection refused",
            ));
        }
        match self.scripts.get(&request.context_size) {
            Some(script) => script.clone(),
            None => Ok(response_at(
                request.context_size as u64,
                request.max_tokens as u64,
                self.default_eval_tps,
            )),
        }
    }

    async fn warmup(&self, model: &str, context_size: u32) -> Result<()> {
        self.check_reachable()?;
        if let Ok(mut warmups) = self.warmups.lock() {
            warmups.push((model.to_string(), context_size));
        }
        Ok(())
    }

    async fn unload(&self, _model: &str) -> Result<()> {
        self.check_reachable()?;
        self.unloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        self.check_reachable()?;
        Ok(self.models.clone())
    }

    async fn server_version(&self) -> Result<String> {
        self.check_reachable()?;
        Ok(self.version.clone())
    }
}

/// Hardware sampler that cycles through a fixed list of samples
pub struct FixedSampler {
    samples: Vec<TelemetrySample>,
    next: AtomicUsize,
    unified: bool,
}

impl FixedSampler {
    pub fn new(samples: Vec<TelemetrySample>) -> Self {
        Self {
            samples,
            next: AtomicUsize::new(0),
            unified: false,
        }
    }

    /// A sampler that always reports the same reading
    pub fn constant(sample: TelemetrySample) -> Self {
        Self::new(vec![sample])
    }

    /// A sampler that never measures anything
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn unified(mut self) -> Self {
        self.unified = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.next.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HardwareSampler for FixedSampler {
    async fn sample(&self) -> TelemetrySample {
        let index = self.next.fetch_add(1, Ordering::SeqCst);
        match self.samples.len() {
            0 => TelemetrySample::empty(),
            len => TelemetrySample {
                timestamp: Utc::now(),
                ..self.samples[index % len].clone()
            },
        }
    }

    fn name(&self) -> &'static str {
        "fixed"
    }

    fn is_unified_memory(&self) -> bool {
        self.unified
    }
}

/// Log source holding a fixed set of records. Records become visible only
/// after `hidden_reads` reads, to imitate a log that lags the response.
pub struct ScriptedLogSource {
    records: Vec<LogRecord>,
    hidden_reads: usize,
    reads: AtomicUsize,
}

impl ScriptedLogSource {
    pub fn new(records: Vec<LogRecord>) -> Self {
        Self {
            records,
            hidden_reads: 0,
            reads: AtomicUsize::new(0),
        }
    }

    pub fn with_lag(mut self, hidden_reads: usize) -> Self {
        self.hidden_reads = hidden_reads;
        self
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogSource for ScriptedLogSource {
    async fn cursor(&self) -> LogCursor {
        LogCursor::File { offset: 0 }
    }

    async fn read_records(&self, since: &LogCursor) -> LogBatch {
        let read = self.reads.fetch_add(1, Ordering::SeqCst);
        if read < self.hidden_reads {
            return LogBatch::empty(since.clone());
        }
        LogBatch {
            records: self.records.clone(),
            next: since.clone(),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Events seen by a [`MemoryReporter`]
#[derive(Debug, Clone, PartialEq)]
pub enum ReportEvent {
    RunStarted(RunMetadata),
    ModelStarted(ModelInfo),
    Trial(String, TrialResult),
    ModelFinished(ModelOutcome),
    RunFinished(usize),
}

/// Reporter that keeps every event in a shared buffer
#[derive(Clone, Default)]
pub struct MemoryReporter {
    events: Arc<Mutex<Vec<ReportEvent>>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ReportEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Recorded trials in the order they were reported
    pub fn trials(&self) -> Vec<TrialResult> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ReportEvent::Trial(_, result) => Some(result),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: ReportEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| Error::report("reporter buffer poisoned"))?
            .push(event);
        Ok(())
    }
}

impl Reporter for MemoryReporter {
    fn run_started(&mut self, run: &RunMetadata) -> Result<()> {
        self.push(ReportEvent::RunStarted(run.clone()))
    }

    fn model_started(&mut self, model: &ModelInfo) -> Result<()> {
        self.push(ReportEvent::ModelStarted(model.clone()))
    }

    fn trial_recorded(&mut self, model: &ModelInfo, result: &TrialResult) -> Result<()> {
        self.push(ReportEvent::Trial(model.name.clone(), result.clone()))
    }

    fn model_finished(&mut self, outcome: &ModelOutcome) -> Result<()> {
        self.push(ReportEvent::ModelFinished(outcome.clone()))
    }

    fn run_finished(&mut self, outcomes: &[ModelOutcome]) -> Result<()> {
        self.push(ReportEvent::RunFinished(outcomes.len()))
    }
}
