//! Ollama adapter

use crate::api::{self, GenerateOptions};
use crate::prompt::filler_prompt;
use crate::{Result, RuntimeError};
use async_trait::async_trait;
use ctxtune_core::{
    GenerateRequest, GenerateResponse, InferenceClient, ModelInfo, ServerConfig, TrialFailure,
};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const TIMED_TEMPERATURE: f32 = 0.1;
const MAX_ERROR_BODY: usize = 200;

/// HTTP client for an Ollama server
pub struct OllamaClient {
    base: Url,
    client: Client,
    request_timeout: Duration,
    probe_timeout: Duration,
    unload_timeout: Duration,
}

impl OllamaClient {
    /// Create a client for the server at `endpoint`
    pub fn new(endpoint: &str) -> Result<Self> {
        let mut base = Url::parse(endpoint.trim())?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(RuntimeError::Configuration(format!(
                "Unsupported scheme in {}",
                endpoint
            )));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = Client::builder().build().map_err(|e| {
            RuntimeError::Configuration(format!("Failed to create HTTP client: {}", e))
        })?;

        Ok(Self {
            base,
            client,
            request_timeout: Duration::from_secs(1800),
            probe_timeout: Duration::from_secs(3),
            unload_timeout: Duration::from_secs(60),
        })
    }

    /// Create a client from the server configuration section
    pub fn from_config(config: &ServerConfig, request_timeout: Duration) -> Result<Self> {
        info!("Creating Ollama client for endpoint: {}", config.url);
        Ok(Self::new(&config.url)?
            .with_request_timeout(request_timeout)
            .with_probe_timeout(config.probe_timeout()))
    }

    /// Upper bound for generation and warm-up requests
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Upper bound for metadata requests
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.base
    }

    fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path)?)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await.map_err(RuntimeError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<api::ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or_else(|_| body.chars().take(MAX_ERROR_BODY).collect());
            return Err(RuntimeError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.bytes().await.map_err(RuntimeError::from_reqwest)?;
        serde_json::from_slice(&body).map_err(|e| RuntimeError::InvalidResponse(e.to_string()))
    }

    async fn post_generate(
        &self,
        body: &api::GenerateRequest,
        timeout: Duration,
    ) -> Result<api::GenerateResponse> {
        let request = self
            .client
            .post(self.url("api/generate")?)
            .timeout(timeout)
            .json(body);
        self.send(request).await
    }

    async fn timed_generate(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
        let body = api::GenerateRequest {
            model: request.model.clone(),
            prompt: Some(filler_prompt(request.context_size)),
            stream: false,
            options: Some(GenerateOptions {
                num_ctx: request.context_size,
                num_predict: request.max_tokens,
                temperature: TIMED_TEMPERATURE,
            }),
            keep_alive: None,
        };

        debug!(
            "Generating {} tokens with {} at num_ctx={}",
            request.max_tokens, request.model, request.context_size
        );
        let raw = self.post_generate(&body, self.request_timeout).await?;
        convert_response(raw)
    }
}

/// Turn the wire response into the core shape. A response without any
/// generation counters is not a benchmark result.
pub fn convert_response(raw: api::GenerateResponse) -> Result<GenerateResponse> {
    let (Some(eval_count), Some(eval_duration)) = (raw.eval_count, raw.eval_duration) else {
        return Err(RuntimeError::InvalidResponse(
            "response carries no eval_count/eval_duration".to_string(),
        ));
    };

    Ok(GenerateResponse {
        response_text: raw.response,
        prompt_tokens: raw.prompt_eval_count.unwrap_or(0),
        prompt_time: Duration::from_nanos(raw.prompt_eval_duration.unwrap_or(0)),
        generation_tokens: eval_count,
        generation_time: Duration::from_nanos(eval_duration),
        total_time: raw.total_duration.map(Duration::from_nanos),
    })
}

#[async_trait]
impl InferenceClient for OllamaClient {
    async fn generate(
        &self,
        request: &GenerateRequest,
    ) -> std::result::Result<GenerateResponse, TrialFailure> {
        self.timed_generate(request)
            .await
            .map_err(RuntimeError::into_failure)
    }

    async fn warmup(&self, model: &str, context_size: u32) -> ctxtune_core::Result<()> {
        let body = api::GenerateRequest {
            model: model.to_string(),
            prompt: Some(String::new()),
            stream: false,
            options: Some(GenerateOptions {
                num_ctx: context_size,
                num_predict: 1,
                temperature: 0.0,
            }),
            keep_alive: None,
        };
        debug!("Preloading {} at num_ctx={}", model, context_size);
        self.post_generate(&body, self.request_timeout).await?;
        Ok(())
    }

    async fn unload(&self, model: &str) -> ctxtune_core::Result<()> {
        let body = api::GenerateRequest {
            model: model.to_string(),
            prompt: None,
            stream: false,
            options: None,
            keep_alive: Some(0),
        };
        debug!("Unloading {}", model);
        self.post_generate(&body, self.unload_timeout).await?;
        Ok(())
    }

    async fn list_models(&self) -> ctxtune_core::Result<Vec<ModelInfo>> {
        let request = self
            .client
            .get(self.url("api/tags")?)
            .timeout(self.probe_timeout);
        let tags: api::TagsResponse = self.send(request).await?;

        Ok(tags
            .models
            .into_iter()
            .map(|m| ModelInfo {
                name: m.name,
                digest: m.digest,
                size_bytes: m.size,
            })
            .collect())
    }

    async fn server_version(&self) -> ctxtune_core::Result<String> {
        let request = self
            .client
            .get(self.url("api/version")?)
            .timeout(self.probe_timeout);
        let version: api::VersionResponse = self.send(request).await?;
        Ok(version.version)
    }
}
