//! # ctxtune-runtime
//!
//! Client for the inference server that ctxtune benchmarks.
//!
//! This crate provides:
//! - An Ollama HTTP client implementing [`ctxtune_core::InferenceClient`]
//! - Filler-prompt construction that fills a requested context window
//! - Mapping from transport errors to trial failure kinds
//!
//! ## Example
//!
//! ```rust,no_run
//! use ctxtune_core::{GenerateRequest, InferenceClient};
//! use ctxtune_runtime::OllamaClient;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = OllamaClient::new("http://localhost:11434")?
//!         .with_request_timeout(Duration::from_secs(600));
//!
//!     println!("server {}", client.server_version().await?);
//!
//!     let response = client
//!         .generate(&GenerateRequest {
//!             model: "llama3".to_string(),
//!             context_size: 8192,
//!             max_tokens: 100,
//!         })
//!         .await?;
//!     println!("{:?} t/s", response.eval_speed_tps());
//!
//!     Ok(())
//! }
//! ```

use ctxtune_core::{FailureKind, TrialFailure};
use thiserror::Error;

pub mod api;
pub mod ollama;
pub mod prompt;

pub use ollama::OllamaClient;
pub use prompt::filler_prompt;

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors that can occur while talking to the inference server
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl RuntimeError {
    /// Classify a transport error
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RuntimeError::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() {
            RuntimeError::Connection(err.to_string())
        } else if err.is_decode() || err.is_body() {
            RuntimeError::InvalidResponse(err.to_string())
        } else if let Some(status) = err.status() {
            RuntimeError::Status {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            RuntimeError::Connection(err.to_string())
        }
    }

    /// The trial failure this error amounts to
    pub fn into_failure(self) -> TrialFailure {
        let kind = match &self {
            RuntimeError::Timeout(_) => FailureKind::Timeout,
            RuntimeError::Status { status, .. } => FailureKind::ServerError(*status),
            RuntimeError::InvalidResponse(_) | RuntimeError::Serialization(_) => {
                FailureKind::InvalidResponse
            }
            RuntimeError::Connection(_) | RuntimeError::Configuration(_) | RuntimeError::Url(_) => {
                FailureKind::Connection
            }
        };
        let message = match self {
            RuntimeError::Status { message, .. } => message,
            other => other.to_string(),
        };
        TrialFailure::new(kind, message)
    }
}

impl From<RuntimeError> for ctxtune_core::Error {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Configuration(msg) => ctxtune_core::Error::config(msg),
            RuntimeError::Url(e) => ctxtune_core::Error::config(e.to_string()),
            RuntimeError::Connection(msg) => ctxtune_core::Error::network(msg),
            RuntimeError::Timeout(msg) => ctxtune_core::Error::timeout(msg),
            RuntimeError::Status { status: 404, message } => ctxtune_core::Error::not_found(message),
            other => ctxtune_core::Error::runtime(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_mapping() {
        let failure = RuntimeError::Timeout("slow".to_string()).into_failure();
        assert_eq!(failure.kind, FailureKind::Timeout);

        let failure = RuntimeError::Status {
            status: 500,
            message: "model runner crashed".to_string(),
        }
        .into_failure();
        assert_eq!(failure.kind, FailureKind::ServerError(500));
        assert_eq!(failure.message, "model runner crashed");

        let failure = RuntimeError::InvalidResponse("eof".to_string()).into_failure();
        assert_eq!(failure.kind, FailureKind::InvalidResponse);

        let failure = RuntimeError::Connection("refused".to_string()).into_failure();
        assert!(failure.kind.is_connectivity());
    }

    #[test]
    fn test_error_conversion() {
        let err: ctxtune_core::Error = RuntimeError::Connection("refused".to_string()).into();
        assert_eq!(err.category(), "network");

        let err: ctxtune_core::Error = RuntimeError::Status {
            status: 404,
            message: "model not found".to_string(),
        }
        .into();
        assert_eq!(err.category(), "not_found");
    }

    #[test]
    fn test_error_display() {
        let error = RuntimeError::Status {
            status: 500,
            message: "boom".to_string(),
        };
        assert_eq!(error.to_string(), "Server returned 500: boom");
    }
}
