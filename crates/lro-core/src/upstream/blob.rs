//! Blob storage reached over plain HTTP(S) GET (e.g. SAS URLs).

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use super::BlobStore;
use crate::error::{Error, Result};

#[derive(Clone)]
pub struct HttpBlobStore {
    client: reqwest::Client,
}

impl HttpBlobStore {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        debug!("Fetching blob {}", url);

        let resp = self.client.get(url).send().await.map_err(|e| {
            warn!(error = %e, "Blob unreachable");
            Error::validation(format!("Referenced blob is unreachable: {}", e))
        })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::validation(format!(
                "Referenced blob returned HTTP {}",
                status.as_u16()
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::validation(format!("Failed to read referenced blob: {}", e)))?;
        Ok(bytes.to_vec())
    }
}
