//! API client for connecting to lro-server.
//!
//! # Usage
//!
//! ```rust,no_run
//! use lro_core::client::{ApiClient, SubmitOutcome};
//! use lro_core::WorkPayload;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = ApiClient::new("http://127.0.0.1:7878")?;
//!     let payload = WorkPayload::new("invoice", "https://docs.example.com/a.pdf");
//!     match client.submit(&payload).await? {
//!         SubmitOutcome::Completed(result) => println!("{}", result.id),
//!         SubmitOutcome::Accepted { operation_id, .. } => println!("pending {}", operation_id),
//!     }
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::Serialize;
use tracing::debug;

use crate::api::{AcceptedResponse, ErrorBody, HealthResponse};
use crate::error::{Error, Result};
use crate::types::{CanonicalResult, OperationStatus, WorkPayload};

/// Default server address
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:7878";

/// Answer to a submission.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    Completed(CanonicalResult),
    Accepted {
        operation_id: String,
        status: OperationStatus,
        retry_after: Option<Duration>,
    },
}

/// Answer to a result query.
#[derive(Debug, Clone)]
pub enum ResultOutcome {
    Completed(CanonicalResult),
    Processing {
        operation_id: String,
        status: OperationStatus,
        poll_count: u32,
        retry_after: Option<Duration>,
    },
}

/// API client for lro-server
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            client,
        })
    }

    /// Set the authentication token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if the server is available
    pub async fn health(&self) -> Result<HealthResponse> {
        let resp = self.send::<()>(Method::GET, "/health", None).await?;
        parse_json(resp).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Operations
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn submit(&self, payload: &WorkPayload) -> Result<SubmitOutcome> {
        let resp = self
            .send(Method::POST, "/api/operations", Some(payload))
            .await?;

        if resp.status() == StatusCode::ACCEPTED {
            let retry_after = retry_after(&resp);
            let accepted: AcceptedResponse = parse_json(resp).await?;
            return Ok(SubmitOutcome::Accepted {
                operation_id: accepted.operation_id,
                status: accepted.status,
                retry_after,
            });
        }
        Ok(SubmitOutcome::Completed(parse_json(resp).await?))
    }

    pub async fn get_result(&self, operation_id: &str) -> Result<ResultOutcome> {
        let path = format!("/api/operations/{}", operation_id);
        let resp = self.send::<()>(Method::GET, &path, None).await?;

        if resp.status() == StatusCode::ACCEPTED {
            let retry_after = retry_after(&resp);
            let accepted: AcceptedResponse = parse_json(resp).await?;
            return Ok(ResultOutcome::Processing {
                operation_id: accepted.operation_id,
                status: accepted.status,
                poll_count: accepted.poll_count,
                retry_after,
            });
        }
        Ok(ResultOutcome::Completed(parse_json(resp).await?))
    }

    /// Release this caller's interest in an operation.
    pub async fn cancel(&self, operation_id: &str) -> Result<()> {
        let path = format!("/api/operations/{}", operation_id);
        self.send::<()>(Method::DELETE, &path, None).await?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // HTTP helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// Send a request; non-2xx answers are turned into typed errors.
    async fn send<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        debug!("API request: {} {}", method, url);

        let mut req = self.client.request(method, &url);
        if let Some(ref token) = self.token {
            req = req.bearer_auth(token);
        }
        if let Some(b) = body {
            req = req.json(b);
        }

        let resp = req.send().await.map_err(|e| {
            Error::transient(format!("HTTP request failed: {}. Is lro-server running?", e))
        })?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let text = resp.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => Err(body.into_error()),
            Err(_) if status == StatusCode::NOT_FOUND => Err(Error::NotFound(path.to_string())),
            Err(_) if status.is_server_error() => {
                Err(Error::transient(format!("API error {}: {}", status, text)))
            }
            Err(_) => Err(Error::Other(format!("API error {}: {}", status, text))),
        }
    }
}

async fn parse_json<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    resp.json()
        .await
        .map_err(|e| Error::Other(format!("Failed to parse response: {}", e)))
}

fn retry_after(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
