//! Shared types for lro-core.
//!
//! These types are used by the orchestrator, the lro-server HTTP layer and
//! the API client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::error::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Work payload
// ─────────────────────────────────────────────────────────────────────────────

/// One unit of work to run through the external analysis service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkPayload {
    /// Analyzer (schema) identifier on the upstream service
    pub analyzer_id: String,
    /// URL of the document the upstream should analyze
    pub document_url: String,
    /// Analyzer definition to create or replace before analyzing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<SchemaSource>,
    /// Extra analyze parameters, forwarded verbatim
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Desired shape of the canonical result
    #[serde(default)]
    pub output_shape: OutputShape,
    /// Caller correlation id; excluded from the fingerprint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_request_id: Option<String>,
}

impl WorkPayload {
    pub fn new(analyzer_id: impl Into<String>, document_url: impl Into<String>) -> Self {
        Self {
            analyzer_id: analyzer_id.into(),
            document_url: document_url.into(),
            schema: None,
            parameters: Map::new(),
            output_shape: OutputShape::default(),
            client_request_id: None,
        }
    }

    pub fn with_schema(mut self, schema: SchemaSource) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn with_output_shape(mut self, shape: OutputShape) -> Self {
        self.output_shape = shape;
        self
    }

    pub fn with_client_request_id(mut self, id: impl Into<String>) -> Self {
        self.client_request_id = Some(id.into());
        self
    }
}

/// Where the analyzer definition comes from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum SchemaSource {
    /// Definition carried in the payload
    Inline { definition: Value },
    /// Definition stored in blob storage; only the handle travels in the payload
    Blob { url: String },
}

/// Desired output shape hint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputShape {
    #[default]
    Records,
    Tabular,
}

// ─────────────────────────────────────────────────────────────────────────────
// Canonical result
// ─────────────────────────────────────────────────────────────────────────────

/// Normalized result envelope exposed to every consumer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalResult {
    pub id: String,
    pub status: String,
    pub content_items: Vec<Value>,
    pub metadata: Map<String, Value>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Operation
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Submitted,
    Polling,
    Succeeded,
    Failed,
    TimedOut,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Succeeded | OperationStatus::Failed | OperationStatus::TimedOut
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Submitted => "submitted",
            OperationStatus::Polling => "polling",
            OperationStatus::Succeeded => "succeeded",
            OperationStatus::Failed => "failed",
            OperationStatus::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    Transient,
    UpstreamFailure,
    Timeout,
}

/// Structured error attached to a Failed or TimedOut operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationFailure {
    pub kind: FailureKind,
    /// Raw upstream status string, unnormalized
    pub upstream_status: Option<String>,
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

/// One submitted unit of work and its polling progress.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Operation {
    pub operation_id: String,
    /// Identifier assigned by the upstream, if it reported one
    pub upstream_id: Option<String>,
    pub fingerprint: String,
    pub status: OperationStatus,
    pub submitted_at: DateTime<Utc>,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub poll_count: u32,
    pub last_upstream_status: Option<String>,
    pub operation_location: Option<String>,
    pub result: Option<Arc<CanonicalResult>>,
    pub error: Option<OperationFailure>,
}

impl Operation {
    pub fn new(operation_id: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            upstream_id: None,
            fingerprint: fingerprint.into(),
            status: OperationStatus::Submitted,
            submitted_at: Utc::now(),
            last_polled_at: None,
            completed_at: None,
            poll_count: 0,
            last_upstream_status: None,
            operation_location: None,
            result: None,
            error: None,
        }
    }

    /// Wall-clock time from submission to completion (or now, if still running).
    pub fn elapsed_ms(&self) -> u64 {
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - self.submitted_at).num_milliseconds().max(0) as u64
    }

    /// The typed error for a Failed or TimedOut operation.
    pub fn to_error(&self) -> Option<Error> {
        let failure = self.error.as_ref()?;
        let upstream_status = failure
            .upstream_status
            .clone()
            .or_else(|| self.last_upstream_status.clone());
        let operation_id = self.operation_id.clone();

        Some(match failure.kind {
            FailureKind::Validation => Error::Validation {
                message: failure.message.clone(),
                operation_id: Some(operation_id),
                upstream_status,
                details: Some(failure.details.clone()),
            },
            FailureKind::Transient => Error::Transient {
                message: failure.message.clone(),
                operation_id: Some(operation_id),
                upstream_status,
            },
            FailureKind::UpstreamFailure => Error::UpstreamFailure {
                operation_id,
                upstream_status: upstream_status.unwrap_or_default(),
                message: failure.message.clone(),
                details: failure.details.clone(),
            },
            FailureKind::Timeout => Error::Timeout {
                operation_id,
                upstream_status: upstream_status.unwrap_or_default(),
                poll_count: self.poll_count,
                elapsed_ms: self.elapsed_ms(),
            },
        })
    }
}
