//! Error Handling Module
//!
//! A single error type shared by every layer of the client. Parsing and tool
//! failures are normally recovered before they reach the caller; the variants
//! that do escape are request-shape, schema, timeout and configuration errors.
//!
//! # Example
//!
//! ```rust,ignore
//! use bhumi::error::{LlmError, ErrorCategory};
//!
//! let error = LlmError::EmptyRequest("messages must not be empty".into());
//! assert_eq!(error.category(), ErrorCategory::Client);
//! assert!(!error.is_retryable());
//! ```

use thiserror::Error;

/// Coarse error classification used for retry decisions and log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The caller built an invalid request or configuration.
    Client,
    /// The remote provider rejected or failed the request.
    Server,
    /// Transport-level failure (connect, timeout).
    Network,
    /// Output could not be parsed or validated.
    Parsing,
    /// A registered tool failed.
    Tool,
}

/// Errors produced by the completion engine.
#[derive(Error, Debug)]
pub enum LlmError {
    /// The request carried no messages and no input.
    #[error("Empty request: {0}")]
    EmptyRequest(String),

    /// A request parameter is invalid.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Client configuration is invalid or incomplete.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Output could not be parsed.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// No JSON could be extracted from model text.
    #[error("Extraction error: {0}")]
    ExtractionError(String),

    /// Extracted JSON did not satisfy the requested schema.
    #[error("Schema validation error: {0}")]
    SchemaValidation(String),

    /// The model requested a tool that is not registered.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// A tool handler returned an error.
    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    /// Accumulated tool arguments are not valid JSON.
    #[error("Invalid tool arguments for '{name}': {reason}")]
    InvalidToolArguments { name: String, reason: String },

    /// A round did not complete within the configured timeout.
    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The tool-calling loop hit its configured round cap.
    #[error("Exceeded maximum of {0} rounds")]
    MaxRoundsExceeded(usize),

    /// The dispatch engine rejected a submission.
    #[error("Engine error: {0}")]
    EngineError(String),

    /// HTTP transport failure.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Provider returned an error status.
    #[error("API error {code}: {message}")]
    ApiError { code: u16, message: String },

    /// Streaming transport failure.
    #[error("Stream error: {0}")]
    StreamError(String),

    /// Filesystem failure (archive persistence).
    #[error("IO error: {0}")]
    IoError(String),
}

impl LlmError {
    /// Classify the error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::EmptyRequest(_) | Self::InvalidParameter(_) | Self::ConfigurationError(_) => {
                ErrorCategory::Client
            }
            Self::MaxRoundsExceeded(_) => ErrorCategory::Client,
            Self::ParseError(_) | Self::ExtractionError(_) | Self::SchemaValidation(_) => {
                ErrorCategory::Parsing
            }
            Self::ToolNotFound(_) | Self::ToolExecution(_) | Self::InvalidToolArguments { .. } => {
                ErrorCategory::Tool
            }
            Self::Timeout(_) | Self::HttpError(_) | Self::StreamError(_) => ErrorCategory::Network,
            Self::ApiError { code, .. } if *code < 500 => ErrorCategory::Client,
            Self::ApiError { .. } | Self::EngineError(_) | Self::IoError(_) => ErrorCategory::Server,
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpError(_) | Self::StreamError(_) | Self::Timeout(_) => true,
            Self::ApiError { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }

    /// HTTP status code, when the error carries one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::ApiError { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError(err.to_string())
    }
}

impl From<std::io::Error> for LlmError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::HttpError(format!("timeout: {err}"));
        }
        match err.status() {
            Some(status) => Self::ApiError {
                code: status.as_u16(),
                message: err.to_string(),
            },
            None => Self::HttpError(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_follow_variant() {
        assert_eq!(
            LlmError::EmptyRequest("x".into()).category(),
            ErrorCategory::Client
        );
        assert_eq!(
            LlmError::SchemaValidation("x".into()).category(),
            ErrorCategory::Parsing
        );
        assert_eq!(
            LlmError::ApiError {
                code: 503,
                message: "down".into()
            }
            .category(),
            ErrorCategory::Server
        );
    }

    #[test]
    fn retryable_only_for_transient_failures() {
        assert!(
            LlmError::ApiError {
                code: 429,
                message: "slow down".into()
            }
            .is_retryable()
        );
        assert!(!LlmError::ParseError("bad".into()).is_retryable());
        assert!(LlmError::Timeout(std::time::Duration::from_secs(1)).is_retryable());
    }
}
