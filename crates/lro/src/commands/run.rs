//! In-process run: drive one submission without lro-server.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use lro_core::{HttpAnalysisService, HttpBlobStore, Orchestrator};
use tracing::info;

use super::{build_payload, print_result};
use crate::cli::PayloadArgs;
use crate::config::Config;

pub async fn execute(args: &PayloadArgs, config: &Config, json: bool) -> Result<()> {
    let payload = build_payload(args)?;

    let service = HttpAnalysisService::new(&config.upstream)
        .context("Upstream analysis service is not configured (set LRO_UPSTREAM_ENDPOINT)")?;
    let blobs = HttpBlobStore::new(Duration::from_secs(config.upstream.request_timeout_secs))?;
    let orchestrator = Orchestrator::new(
        config.orchestrator.clone(),
        Arc::new(service),
        Arc::new(blobs),
    )?;

    info!(analyzer_id = %payload.analyzer_id, "Running in-process");
    let result = orchestrator.submit_and_wait(payload).await?;
    print_result(&result, json)
}
