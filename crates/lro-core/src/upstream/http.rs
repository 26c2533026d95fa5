//! HTTP implementation of the analysis service contract.
//!
//! Pinned to one contract version: object-form field schemas, the
//! `api-version` query parameter, and operation-location headers used exactly
//! as received. Poll URLs are never rebuilt from ids.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, LOCATION, RETRY_AFTER};
use reqwest::{Method, Url};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::{AnalysisService, UpstreamResponse};
use crate::config::UpstreamConfig;
use crate::error::{Error, Result};

const OPERATION_LOCATION: &str = "operation-location";

/// Analysis service reached over HTTP with bearer-token authentication.
#[derive(Clone)]
pub struct HttpAnalysisService {
    endpoint: Url,
    api_version: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpAnalysisService {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        config.validate()?;

        let endpoint = Url::parse(config.endpoint.trim_end_matches('/'))
            .map_err(|e| Error::Other(format!("Invalid upstream endpoint: {}", e)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            endpoint,
            api_version: config.api_version.clone(),
            api_key: config.api_key.clone(),
            client,
        })
    }

    fn analyzer_url(&self, analyzer_id: &str, suffix: &str) -> Result<Url> {
        let base = self.endpoint.as_str().trim_end_matches('/');
        let mut url = Url::parse(&format!(
            "{}/contentunderstanding/analyzers/{}{}",
            base, analyzer_id, suffix
        ))
        .map_err(|e| Error::validation(format!("Invalid analyzer id '{}': {}", analyzer_id, e)))?;
        url.query_pairs_mut()
            .append_pair("api-version", &self.api_version);
        Ok(url)
    }

    async fn send(&self, method: Method, url: &str, body: Option<&Value>) -> Result<UpstreamResponse> {
        debug!("Upstream request: {} {}", method, url);

        let mut req = self.client.request(method, url);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        if let Some(b) = body {
            req = req.json(b);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Error::transient(format!("Upstream request failed: {}", e)))?;

        let status = resp.status().as_u16();
        let operation_location = operation_location(status, resp.headers());
        let retry_after = retry_after(resp.headers());
        let text = resp
            .text()
            .await
            .map_err(|e| Error::transient(format!("Failed to read upstream response: {}", e)))?;

        Ok(UpstreamResponse {
            status,
            operation_location,
            retry_after,
            body: parse_body(&text),
        })
    }
}

#[async_trait]
impl AnalysisService for HttpAnalysisService {
    async fn create_analyzer(&self, analyzer_id: &str, definition: &Value) -> Result<UpstreamResponse> {
        let url = self.analyzer_url(analyzer_id, "")?;
        self.send(Method::PUT, url.as_str(), Some(definition)).await
    }

    async fn analyze(&self, analyzer_id: &str, request: &Value) -> Result<UpstreamResponse> {
        let url = self.analyzer_url(analyzer_id, ":analyze")?;
        self.send(Method::POST, url.as_str(), Some(request)).await
    }

    async fn poll(&self, operation_location: &str) -> Result<UpstreamResponse> {
        self.send(Method::GET, operation_location, None).await
    }
}

/// Operation-location header. `Location` stands in for it only on a 202; on
/// any other status it is an ordinary redirect or resource link.
fn operation_location(status: u16, headers: &HeaderMap) -> Option<String> {
    let header = match headers.get(OPERATION_LOCATION) {
        Some(value) => Some(value),
        None if status == 202 => headers.get(LOCATION),
        None => None,
    };
    header
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}
