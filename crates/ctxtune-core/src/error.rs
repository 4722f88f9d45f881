//! Error handling for ctxtune
//!
//! Provides a unified error type and result type for use across all ctxtune components.
//! Telemetry misses and failed trials are not errors: they travel as absent values and
//! [`crate::TrialFailure`] records respectively.

/// Result type alias for ctxtune operations
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for ctxtune
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration-related errors, raised before any trial runs
    #[error("Configuration error: {0}")]
    InvalidConfiguration(String),

    /// Network-related errors
    #[error("Network error: {0}")]
    Network(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Operation timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Inference server client errors
    #[error("Inference server error: {0}")]
    Runtime(String),

    /// Telemetry errors (only surfaced by explicit probes, never by sampling)
    #[error("Telemetry error: {0}")]
    Telemetry(String),

    /// Report writing errors
    #[error("Report error: {0}")]
    Report(String),

    /// The inference server is unreachable; the run cannot continue
    #[error("Fatal: {0}")]
    Fatal(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration parsing errors
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    /// Generic error with context
    #[error("Error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create a network error
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create an inference server error
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    /// Create a telemetry error
    pub fn telemetry(msg: impl Into<String>) -> Self {
        Self::Telemetry(msg.into())
    }

    /// Create a report error
    pub fn report(msg: impl Into<String>) -> Self {
        Self::Report(msg.into())
    }

    /// Create a fatal error
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// Check if this error ends the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::InvalidConfiguration(_) => "configuration",
            Error::Network(_) => "network",
            Error::NotFound(_) => "not_found",
            Error::Timeout(_) => "timeout",
            Error::Runtime(_) => "runtime",
            Error::Telemetry(_) => "telemetry",
            Error::Report(_) => "report",
            Error::Fatal(_) => "fatal",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::Config(_) => "config",
            Error::Other(_) => "other",
        }
    }
}
