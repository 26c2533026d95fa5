//! Wire types shared by lro-server and its clients.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{Error, ErrorKind};
use crate::orchestrator::OrchestratorStats;
use crate::types::OperationStatus;

/// Body of a `202 Accepted` answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AcceptedResponse {
    pub operation_id: String,
    pub status: OperationStatus,
    #[serde(default)]
    pub poll_count: u32,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub operations: OrchestratorStats,
}

/// JSON error envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorBody {
    pub fn from_error(error: &Error) -> Self {
        let (message, details) = match error {
            Error::Validation {
                message, details, ..
            } => (message.clone(), details.clone()),
            Error::Transient { message, .. } => (message.clone(), None),
            Error::UpstreamFailure {
                message, details, ..
            } => (message.clone(), Some(details.clone())),
            Error::Timeout {
                poll_count,
                elapsed_ms,
                ..
            } => (
                error.to_string(),
                Some(json!({ "poll_count": poll_count, "elapsed_ms": elapsed_ms })),
            ),
            other => (other.to_string(), None),
        };

        Self {
            kind: error.kind(),
            message,
            operation_id: error.operation_id().map(str::to_string),
            upstream_status: error.upstream_status().map(str::to_string),
            details: details.filter(|d| !d.is_null()),
        }
    }

    /// Rebuild the typed error on the client side.
    pub fn into_error(self) -> Error {
        match self.kind {
            ErrorKind::Validation => Error::Validation {
                message: self.message,
                operation_id: self.operation_id,
                upstream_status: self.upstream_status,
                details: self.details,
            },
            ErrorKind::Transient => Error::Transient {
                message: self.message,
                operation_id: self.operation_id,
                upstream_status: self.upstream_status,
            },
            ErrorKind::UpstreamFailure => Error::UpstreamFailure {
                operation_id: self.operation_id.unwrap_or_default(),
                upstream_status: self.upstream_status.unwrap_or_default(),
                message: self.message,
                details: self.details.unwrap_or(Value::Null),
            },
            ErrorKind::Timeout => {
                let field = |name: &str| {
                    self.details
                        .as_ref()
                        .and_then(|d| d.get(name))
                        .and_then(Value::as_u64)
                        .unwrap_or(0)
                };
                Error::Timeout {
                    poll_count: field("poll_count") as u32,
                    elapsed_ms: field("elapsed_ms"),
                    operation_id: self.operation_id.unwrap_or_default(),
                    upstream_status: self.upstream_status.unwrap_or_default(),
                }
            }
            ErrorKind::NotFound => match self.operation_id {
                Some(id) => Error::OperationNotFound(id),
                None => Error::NotFound(self.message),
            },
            ErrorKind::Internal => Error::Other(self.message),
        }
    }
}
