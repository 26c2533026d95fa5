//! Outbound collaborators: the external analysis service and blob storage.
//!
//! Both are traits so the orchestrator can be driven against in-memory
//! doubles in tests and against HTTP implementations in production.

mod blob;
mod http;

pub use blob::HttpBlobStore;
pub use http::HttpAnalysisService;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::error::Result;

/// Raw upstream response. Any HTTP status is returned as-is; interpreting it
/// is the classifier's job.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamResponse {
    pub status: u16,
    /// Operation-location header, exactly as sent by the service
    pub operation_location: Option<String>,
    /// Retry-After hint
    pub retry_after: Option<Duration>,
    pub body: Value,
}

impl UpstreamResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            operation_location: None,
            retry_after: None,
            body,
        }
    }

    pub fn with_operation_location(mut self, location: impl Into<String>) -> Self {
        self.operation_location = Some(location.into());
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

/// The external analysis service.
///
/// Implementations return `Error::Transient` for transport failures only.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Create or replace an analyzer definition.
    async fn create_analyzer(&self, analyzer_id: &str, definition: &Value)
    -> Result<UpstreamResponse>;

    /// Submit a document for analysis.
    async fn analyze(&self, analyzer_id: &str, request: &Value) -> Result<UpstreamResponse>;

    /// Poll an operation-location, used verbatim.
    async fn poll(&self, operation_location: &str) -> Result<UpstreamResponse>;
}

/// Storage holding payload data referenced by handle.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch the referenced blob. Unreachable blobs are `Error::Validation`.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}
