//! Error types for lro-core.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::ConfigValidationError;

/// Result type alias using lro-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy surfaced by the orchestrator.
///
/// The first four variants are the terminal outcomes callers are expected to
/// branch on; [`Error::kind`] gives the stable machine-readable category.
#[derive(Error, Debug)]
pub enum Error {
    /// Payload rejected before or at submission. Never retried.
    #[error("validation error: {message}")]
    Validation {
        message: String,
        operation_id: Option<String>,
        upstream_status: Option<String>,
        details: Option<Value>,
    },

    /// Network failure or upstream 5xx. The caller may retry the whole submission.
    #[error("transient error: {message}")]
    Transient {
        message: String,
        operation_id: Option<String>,
        upstream_status: Option<String>,
    },

    /// Operation reached the Failed state with a structured upstream error.
    #[error("operation {operation_id} failed (upstream status '{upstream_status}'): {message}")]
    UpstreamFailure {
        operation_id: String,
        upstream_status: String,
        message: String,
        details: Value,
    },

    /// Polling exceeded its attempt or wall-clock budget.
    #[error(
        "operation {operation_id} timed out after {poll_count} polls in {elapsed_ms}ms (last upstream status '{upstream_status}')"
    )]
    Timeout {
        operation_id: String,
        upstream_status: String,
        poll_count: u32,
        elapsed_ms: u64,
    },

    #[error("Operation not found: {0}")]
    OperationNotFound(String),

    #[error("Operation abandoned before completion: {0}")]
    Abandoned(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigValidationError),

    #[error("Registry lock poisoned")]
    LockPoisoned,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Stable error category, used on the wire between lro-server and its clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Transient,
    UpstreamFailure,
    Timeout,
    NotFound,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Transient => "transient",
            ErrorKind::UpstreamFailure => "upstream_failure",
            ErrorKind::Timeout => "timeout",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Internal => "internal",
        }
    }
}

impl Error {
    /// Create a validation error with no upstream context
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            operation_id: None,
            upstream_status: None,
            details: None,
        }
    }

    /// Create a transient error with no upstream context
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            operation_id: None,
            upstream_status: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation { .. } => ErrorKind::Validation,
            Error::Transient { .. } => ErrorKind::Transient,
            Error::UpstreamFailure { .. } => ErrorKind::UpstreamFailure,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::OperationNotFound(_) | Error::NotFound(_) => ErrorKind::NotFound,
            Error::Abandoned(_)
            | Error::Config(_)
            | Error::LockPoisoned
            | Error::Serialization(_)
            | Error::Other(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller may retry the whole submission.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient { .. })
    }

    pub fn operation_id(&self) -> Option<&str> {
        match self {
            Error::Validation { operation_id, .. } | Error::Transient { operation_id, .. } => {
                operation_id.as_deref()
            }
            Error::UpstreamFailure { operation_id, .. } | Error::Timeout { operation_id, .. } => {
                Some(operation_id)
            }
            Error::OperationNotFound(id) | Error::Abandoned(id) => Some(id),
            _ => None,
        }
    }

    /// Raw (unnormalized) upstream status string, when one was observed.
    pub fn upstream_status(&self) -> Option<&str> {
        match self {
            Error::Validation { upstream_status, .. } | Error::Transient { upstream_status, .. } => {
                upstream_status.as_deref()
            }
            Error::UpstreamFailure { upstream_status, .. } | Error::Timeout { upstream_status, .. } => {
                Some(upstream_status)
            }
            _ => None,
        }
    }
}
