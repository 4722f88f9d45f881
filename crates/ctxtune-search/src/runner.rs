//! Benchmark trial runner
//!
//! One trial is: optional unload and settle, baseline sample, optional warm-up,
//! the timed request with a sampler task running alongside it, then a bounded
//! poll of the server log for the record describing this trial's runner.

use ctxtune_core::{
    FailureKind, HardwareSampler, InferenceClient, LogCursor, LogRecord, LogSource, TelemetrySample,
    TelemetryWindow, TrialConfig, TrialFailure, TrialResult, TuneConfig,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Timing knobs for a trial
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerOptions {
    pub sample_interval: Duration,
    pub request_timeout: Duration,
    pub log_poll_attempts: u32,
    pub log_poll_backoff: Duration,
    pub unload_between_trials: bool,
    pub settle_delay: Duration,
}

impl RunnerOptions {
    pub fn from_config(config: &TuneConfig) -> Self {
        Self {
            sample_interval: config.telemetry.interval(),
            request_timeout: config.request_timeout(),
            log_poll_attempts: config.logs.poll_attempts,
            log_poll_backoff: config.logs.poll_backoff(),
            unload_between_trials: config.search.unload_between_trials,
            settle_delay: config.search.settle_delay(),
        }
    }
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_millis(250),
            request_timeout: Duration::from_secs(1800),
            log_poll_attempts: 5,
            log_poll_backoff: Duration::from_millis(250),
            unload_between_trials: true,
            settle_delay: Duration::from_millis(1500),
        }
    }
}

/// Runs single trials against the inference server
pub struct TrialRunner {
    client: Arc<dyn InferenceClient>,
    sampler: Arc<dyn HardwareSampler>,
    logs: Arc<dyn LogSource>,
    options: RunnerOptions,
}

impl TrialRunner {
    pub fn new(
        client: Arc<dyn InferenceClient>,
        sampler: Arc<dyn HardwareSampler>,
        logs: Arc<dyn LogSource>,
    ) -> Self {
        Self {
            client,
            sampler,
            logs,
            options: RunnerOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    pub fn client(&self) -> &Arc<dyn InferenceClient> {
        &self.client
    }

    pub fn sampler(&self) -> &Arc<dyn HardwareSampler> {
        &self.sampler
    }

    /// Run one trial. Never fails: a broken request becomes a failed result.
    pub async fn run(&self, config: &TrialConfig) -> TrialResult {
        let model = config.model.as_str();

        if self.options.unload_between_trials {
            if let Err(e) = self.client.unload(model).await {
                warn!("Failed to unload {} before trial: {}", model, e);
            }
            if !self.options.settle_delay.is_zero() {
                tokio::time::sleep(self.options.settle_delay).await;
            }
        }

        let baseline = self.sample_once().await;

        // Taken before warm-up: the runner line is written when the model loads
        let cursor = self.logs.cursor().await;

        if config.warmup_enabled {
            debug!("Warming up {} at {}", model, config.target_context_size);
            if let Err(e) = self.client.warmup(model, config.target_context_size).await {
                warn!("Warm-up of {} failed: {}", model, e);
            }
        }

        let started_at = Utc::now();
        let request = config.generate_request();
        let (stop_tx, sampling) = self.spawn_sampling();

        let start = Instant::now();
        let outcome = match tokio::time::timeout(
            self.options.request_timeout,
            self.client.generate(&request),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(TrialFailure::new(
                FailureKind::Timeout,
                format!("no response within {:?}", self.options.request_timeout),
            )),
        };
        let elapsed = start.elapsed();

        let _ = stop_tx.send(());
        let samples = sampling.await.unwrap_or_else(|e| {
            warn!("Sampling task failed: {}", e);
            Vec::new()
        });
        let window = TelemetryWindow::from_samples(&samples);
        debug!("Collected {} telemetry samples", window.sample_count);

        let mut result = match outcome {
            Ok(response) => {
                let mut result = TrialResult::new(config.clone())
                    .with_response(&response, elapsed)
                    .with_telemetry(&window);
                result.log_record = self.find_log_record(cursor, config).await;
                result
            }
            Err(failure) => {
                info!("Trial {} @ {} failed: {}", model, config.target_context_size, failure);
                let poll_log = !failure.kind.is_connectivity();
                let mut result = TrialResult::failed(config.clone(), failure);
                if poll_log {
                    result.log_record = self.find_log_record(cursor, config).await;
                }
                result
            }
        };
        result.started_at = started_at;
        result.baseline_sys_ram_bytes = baseline.system_ram_used_bytes;
        result
    }

    async fn sample_once(&self) -> TelemetrySample {
        tokio::time::timeout(self.options.sample_interval, self.sampler.sample())
            .await
            .unwrap_or_else(|_| TelemetrySample::empty())
    }

    /// Start sampling on a fixed interval until the returned sender fires
    fn spawn_sampling(&self) -> (oneshot::Sender<()>, JoinHandle<Vec<TelemetrySample>>) {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let sampler = Arc::clone(&self.sampler);
        let interval = self.options.sample_interval;

        let handle = tokio::spawn(async move {
            let mut samples = Vec::new();
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            // At least one sample per window, however short the request
            loop {
                match tokio::time::timeout(interval, sampler.sample()).await {
                    Ok(sample) if !sample.is_empty() => samples.push(sample),
                    Ok(_) => {}
                    Err(_) => debug!("{} sample exceeded {:?}", sampler.name(), interval),
                }

                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {}
                }
            }

            samples
        });

        (stop_tx, handle)
    }

    /// Poll the log for this trial's record with doubling backoff
    async fn find_log_record(&self, mut cursor: LogCursor, config: &TrialConfig) -> Option<LogRecord> {
        if cursor == LogCursor::Disabled {
            return None;
        }

        let attempts = self.options.log_poll_attempts.max(1);
        let mut backoff = self.options.log_poll_backoff;

        for attempt in 1..=attempts {
            let batch = self.logs.read_records(&cursor).await;
            cursor = batch.next;

            // Newest matching record wins
            if let Some(record) = batch
                .records
                .into_iter()
                .rev()
                .find(|r| r.matches(&config.model, config.target_context_size))
            {
                debug!("Matched log record on attempt {}", attempt);
                return Some(record);
            }

            if attempt < attempts {
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
        }

        debug!(
            "No log record for {} @ {} after {} attempts",
            config.model, config.target_context_size, attempts
        );
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctxtune_core::mock::{FixedSampler, ScriptedClient, ScriptedLogSource};
    use ctxtune_core::GIB;

    fn no_logs() -> Arc<ScriptedLogSource> {
        Arc::new(ScriptedLogSource::new(Vec::new()))
    }

    fn fast_options() -> RunnerOptions {
        RunnerOptions {
            sample_interval: Duration::from_millis(10),
            request_timeout: Duration::from_secs(5),
            log_poll_attempts: 3,
            log_poll_backoff: Duration::from_millis(1),
            unload_between_trials: true,
            settle_delay: Duration::ZERO,
        }
    }

    fn gpu_sample(util: f64, vram_gib: u64, ram_gib: u64) -> TelemetrySample {
        TelemetrySample {
            gpu_utilization_percent: Some(util),
            vram_used_bytes: Some(vram_gib * GIB),
            vram_total_bytes: Some(24 * GIB),
            system_ram_used_bytes: Some(ram_gib * GIB),
            ..TelemetrySample::empty()
        }
    }

    #[tokio::test]
    async fn test_successful_trial() {
        let client = Arc::new(
            ScriptedClient::new()
                .with_speed(4096, 25.0)
                .with_latency(Duration::from_millis(60)),
        );
        let sampler = Arc::new(FixedSampler::new(vec![
            gpu_sample(60.0, 8, 10),
            gpu_sample(97.0, 11, 12),
            gpu_sample(80.0, 9, 11),
        ]));
        let mut record = LogRecord::new("llama3:latest").with_memory(10 * GIB, 10 * GIB);
        record.context_size_requested = Some(4096);
        let logs = Arc::new(ScriptedLogSource::new(vec![record.clone()]));

        let runner = TrialRunner::new(client.clone(), sampler, logs).with_options(fast_options());
        let result = runner.run(&TrialConfig::new("llama3", 4096, 100)).await;

        assert!(!result.is_failed());
        assert_eq!(result.actual_context_size, Some(4096));
        assert_eq!(result.actual_generated_tokens, Some(100));
        assert!((result.eval_speed_tps.unwrap() - 25.0).abs() < 1e-6);
        assert!(result.response_time_seconds.unwrap() >= 0.05);
        assert_eq!(result.peak_gpu_percent, Some(97.0));
        assert_eq!(result.peak_vram_bytes, Some(11 * GIB));
        assert_eq!(result.vram_total_bytes, Some(24 * GIB));
        assert_eq!(result.log_record, Some(record));
        assert!(result.baseline_sys_ram_bytes.is_some());
        assert!(result.stop_reason.is_none());

        assert_eq!(client.unload_count(), 1);
        assert_eq!(client.warmups(), vec![("llama3".to_string(), 4096)]);
        assert_eq!(client.requests().len(), 1);
        assert_eq!(client.requests()[0].max_tokens, 100);
    }

    #[tokio::test]
    async fn test_warmup_and_unload_can_be_disabled() {
        let client = Arc::new(ScriptedClient::new());
        let runner = TrialRunner::new(
            client.clone(),
            Arc::new(FixedSampler::empty()),
            no_logs(),
        )
        .with_options(RunnerOptions {
            unload_between_trials: false,
            ..fast_options()
        });

        let config = TrialConfig::new("llama3", 2048, 50).with_warmup(false);
        let result = runner.run(&config).await;

        assert!(!result.is_failed());
        assert_eq!(client.unload_count(), 0);
        assert!(client.warmups().is_empty());
        assert!(result.peak_gpu_percent.is_none());
        assert!(result.log_record.is_none());
    }

    #[tokio::test]
    async fn test_failed_request_has_no_performance_fields() {
        let client = Arc::new(ScriptedClient::new().with_failure(
            8192,
            TrialFailure::new(FailureKind::Connection, "connection refused"),
        ));
        let logs = Arc::new(ScriptedLogSource::new(vec![LogRecord::new("llama3")]));
        let runner = TrialRunner::new(
            client,
            Arc::new(FixedSampler::constant(gpu_sample(99.0, 20, 10))),
            logs.clone(),
        )
        .with_options(fast_options());

        let result = runner.run(&TrialConfig::new("llama3", 8192, 100)).await;

        assert!(result.is_failed());
        assert_eq!(
            result.stop_reason,
            Some(ctxtune_core::StopReason::TrialFailed(FailureKind::Connection))
        );
        assert!(result.actual_context_size.is_none());
        assert!(result.eval_speed_tps.is_none());
        assert!(result.response_time_seconds.is_none());
        assert!(result.peak_gpu_percent.is_none());
        assert!(result.peak_vram_bytes.is_none());
        // Connectivity failures do not wait on the log
        assert!(result.log_record.is_none());
        assert_eq!(logs.reads(), 0);
    }

    #[tokio::test]
    async fn test_server_error_still_reads_log() {
        let client = Arc::new(ScriptedClient::new().with_failure(
            8192,
            TrialFailure::new(FailureKind::ServerError(500), "runner crashed"),
        ));
        let mut record = LogRecord::new("llama3:latest").with_memory(30 * GIB, 20 * GIB);
        record.context_size_requested = Some(8192);
        let runner = TrialRunner::new(
            client,
            Arc::new(FixedSampler::empty()),
            Arc::new(ScriptedLogSource::new(vec![record.clone()])),
        )
        .with_options(fast_options());

        let result = runner.run(&TrialConfig::new("llama3", 8192, 100)).await;
        assert!(result.is_failed());
        assert_eq!(result.log_record, Some(record));
    }

    #[tokio::test]
    async fn test_parallel_runner_record_is_attached() {
        // four slots of 4096 load a 16384-token runner
        let mut record = LogRecord::new("llama3:8b").with_memory(12 * GIB, 12 * GIB);
        record.context_size_requested = Some(16384);
        let runner = TrialRunner::new(
            Arc::new(ScriptedClient::new()),
            Arc::new(FixedSampler::empty()),
            Arc::new(ScriptedLogSource::new(vec![record.clone()])),
        )
        .with_options(fast_options());

        let result = runner.run(&TrialConfig::new("llama3:8b", 4096, 100)).await;
        assert!(!result.is_failed());
        assert_eq!(result.log_record, Some(record));
    }

    #[tokio::test]
    async fn test_request_timeout_becomes_failure() {
        let client = Arc::new(ScriptedClient::new().with_latency(Duration::from_secs(10)));
        let runner = TrialRunner::new(
            client,
            Arc::new(FixedSampler::empty()),
            no_logs(),
        )
        .with_options(RunnerOptions {
            request_timeout: Duration::from_millis(50),
            ..fast_options()
        });

        let result = runner.run(&TrialConfig::new("llama3", 4096, 100)).await;
        assert_eq!(
            result.failure.map(|f| f.kind),
            Some(FailureKind::Timeout)
        );
    }

    #[tokio::test]
    async fn test_log_record_polling_is_bounded() {
        let mut record = LogRecord::new("llama3").with_memory(8 * GIB, 8 * GIB);
        record.context_size_requested = Some(4096);

        // Appears on the third read: found
        let logs = Arc::new(ScriptedLogSource::new(vec![record.clone()]).with_lag(2));
        let runner = TrialRunner::new(
            Arc::new(ScriptedClient::new()),
            Arc::new(FixedSampler::empty()),
            logs.clone(),
        )
        .with_options(fast_options());
        let result = runner.run(&TrialConfig::new("llama3", 4096, 100)).await;
        assert_eq!(result.log_record, Some(record.clone()));
        assert_eq!(logs.reads(), 3);

        // Appears on the fourth read: given up after three
        let logs = Arc::new(ScriptedLogSource::new(vec![record]).with_lag(3));
        let runner = TrialRunner::new(
            Arc::new(ScriptedClient::new()),
            Arc::new(FixedSampler::empty()),
            logs.clone(),
        )
        .with_options(fast_options());
        let result = runner.run(&TrialConfig::new("llama3", 4096, 100)).await;
        assert!(result.log_record.is_none());
        assert_eq!(logs.reads(), 3);
    }

    #[tokio::test]
    async fn test_log_record_must_match_trial() {
        let mut other_ctx = LogRecord::new("llama3").with_memory(8 * GIB, 8 * GIB);
        other_ctx.context_size_requested = Some(2048);
        let mut other_model = LogRecord::new("phi3").with_memory(8 * GIB, 8 * GIB);
        other_model.context_size_requested = Some(4096);

        let runner = TrialRunner::new(
            Arc::new(ScriptedClient::new()),
            Arc::new(FixedSampler::empty()),
            Arc::new(ScriptedLogSource::new(vec![other_ctx, other_model])),
        )
        .with_options(fast_options());
        let result = runner.run(&TrialConfig::new("llama3", 4096, 100)).await;
        assert!(result.log_record.is_none());
    }
}
