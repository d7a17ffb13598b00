// src/error.rs

//! Unified error handling for the ingestion pipeline.

use std::fmt;

use thiserror::Error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Coarse classification of a failed pass, used for operator output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Retrieval,
    Persistence,
    Configuration,
    Cancelled,
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Retrieval => "retrieval failure",
            FailureKind::Persistence => "persistence failure",
            FailureKind::Configuration => "configuration failure",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Internal => "internal failure",
        };
        f.write_str(name)
    }
}

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// The source was unreachable or returned malformed data
    #[error("Retrieval error for {context}: {message}")]
    Retrieval { context: String, message: String },

    /// A chunk could not be committed to storage
    #[error("Persistence error: {message}")]
    Persistence {
        message: String,
        #[source]
        source: Option<Box<AppError>>,
    },

    /// Configuration or extended settings were malformed
    #[error("Configuration error: {0}")]
    Config(String),

    /// An operation exceeded its time budget
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    /// The run was cancelled by the operator
    #[error("Run cancelled")]
    Cancelled,

    /// The worker task panicked or was aborted
    #[error("Worker failed: {0}")]
    Worker(String),
}

impl AppError {
    /// Create a retrieval error with context.
    pub fn retrieval(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Retrieval {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create a persistence error without an underlying cause.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an error raised while committing a chunk.
    ///
    /// Errors that already are persistence failures are returned unchanged.
    pub fn persistence_from(message: impl Into<String>, cause: AppError) -> Self {
        match cause {
            already @ AppError::Persistence { .. } => already,
            other => Self::Persistence {
                message: message.into(),
                source: Some(Box::new(other)),
            },
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            secs,
        }
    }

    /// Classify the error for reporting.
    pub fn kind(&self) -> FailureKind {
        match self {
            AppError::Http(_)
            | AppError::Url(_)
            | AppError::Retrieval { .. }
            | AppError::Timeout { .. } => FailureKind::Retrieval,
            AppError::Persistence { .. } => FailureKind::Persistence,
            AppError::Config(_) | AppError::Toml(_) => FailureKind::Configuration,
            AppError::Cancelled => FailureKind::Cancelled,
            AppError::Io(_) | AppError::Json(_) | AppError::Worker(_) => FailureKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistence_from_wraps_cause() {
        let err = AppError::persistence_from("chunk 2", AppError::timeout("write", 5));
        assert_eq!(err.kind(), FailureKind::Persistence);

        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("write timed out after 5s"));
    }

    #[test]
    fn test_persistence_from_keeps_existing_persistence_error() {
        let err = AppError::persistence_from("outer", AppError::persistence("inner"));
        assert_eq!(err.to_string(), "Persistence error: inner");
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            AppError::retrieval("feed", "bad line").kind(),
            FailureKind::Retrieval
        );
        assert_eq!(AppError::config("x").kind(), FailureKind::Configuration);
        assert_eq!(AppError::Cancelled.kind(), FailureKind::Cancelled);
    }
}
