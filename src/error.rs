//! Error types for the risk pipeline
//!
//! Caller-visible errors are classified by who has to act on them:
//! - NonRetryable: malformed requests, not enough signal to assess
//! - RequiresUserAction: configuration problems (bad config file, invalid tables)
//!
//! Only `Validation` and `InsufficientSignal` ever reach a caller of `assess`.
//! `UpstreamError` is recovered inside the adapter by falling back to simulation;
//! its `is_retryable` drives the HTTP retry loop.

use thiserror::Error;

/// A request parameter that failed validation before dispatch.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Invalid {field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Caller-visible and configuration errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Not enough signal to assess risk ({signals_seen} signals, 0 contributing factors)")]
    InsufficientSignal { signals_seen: usize },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Failure of a live upstream call. Never escapes an adapter.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    #[error("Upstream call timed out after {0} ms")]
    Timeout(u64),

    #[error("Upstream returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Upstream request failed: {0}")]
    Transport(String),

    #[error("Malformed upstream payload: {0}")]
    Malformed(String),

    #[error("Request does not match the {0} source")]
    WrongSource(&'static str),
}

impl UpstreamError {
    /// Returns true if the same call could succeed on a later attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Timeout(_) | UpstreamError::Transport(_) => true,
            UpstreamError::Status { status, .. } => *status == 429 || *status == 408 || *status >= 500,
            UpstreamError::Malformed(_) | UpstreamError::WrongSource(_) => false,
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout(0)
        } else if err.is_decode() {
            UpstreamError::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            UpstreamError::Status {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            UpstreamError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for UpstreamError {
    fn from(err: serde_json::Error) -> Self {
        UpstreamError::Malformed(err.to_string())
    }
}

impl PipelineError {
    /// Returns true if this error requires an operator to change configuration
    pub fn requires_user_action(&self) -> bool {
        matches!(self, PipelineError::Configuration(_))
    }

    /// Get an operator-facing recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "Fix the request parameters and try again.",
            PipelineError::InsufficientSignal { .. } => {
                "Widen the region filter or enable more sources."
            }
            PipelineError::Configuration(_) => "Check your configuration in ~/.supplyrisk/config.json",
        }
    }
}

/// Serializable error representation for the CLI / external callers
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorView {
    pub message: String,
    pub error_type: ErrorType,
    pub recovery_suggestion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    NonRetryable,
    RequiresUserAction,
}

impl From<&PipelineError> for ErrorView {
    fn from(err: &PipelineError) -> Self {
        let error_type = if err.requires_user_action() {
            ErrorType::RequiresUserAction
        } else {
            ErrorType::NonRetryable
        };

        ErrorView {
            message: err.to_string(),
            error_type,
            recovery_suggestion: err.recovery_suggestion().to_string(),
        }
    }
}
