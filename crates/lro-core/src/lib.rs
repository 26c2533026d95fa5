//! lro-core - Core library for the analysis operation orchestrator
//!
//! Submits work to an external analysis service, follows long-running
//! operations to completion and hands back one canonical result shape:
//!
//! - **orchestrator**: submission, attachment, result lookup
//! - **poller**: per-operation driver task and poll loop
//! - **normalizer**: upstream payload shapes → [`CanonicalResult`]
//! - **dedup**: fingerprint-keyed in-flight index and result cache
//! - **classify** / **status**: HTTP, payload and upstream status classification
//! - **schema**: field-schema shaping for analyzer definitions
//! - **upstream**: analysis service and blob store seams (HTTP implementations)
//! - **client**: HTTP client for lro-server

pub mod api;
pub mod classify;
pub mod config;
pub mod dedup;
pub mod error;
pub mod fingerprint;
pub mod normalizer;
pub mod orchestrator;
mod poller;
pub mod schema;
pub mod status;
pub mod types;
pub mod upstream;

pub mod client;

// Re-export commonly used types
pub use config::{CacheConfig, OrchestratorConfig, PollPolicy, UpstreamConfig};
pub use error::{Error, ErrorKind, Result};
pub use fingerprint::RequestFingerprint;
pub use orchestrator::{Orchestrator, OrchestratorStats, ResultView, Submission, Ticket};
pub use types::{
    CanonicalResult, FailureKind, Operation, OperationFailure, OperationStatus, OutputShape,
    SchemaSource, WorkPayload,
};
pub use upstream::{AnalysisService, BlobStore, HttpAnalysisService, HttpBlobStore, UpstreamResponse};
