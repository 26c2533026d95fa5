//! Health check endpoint.

use axum::{Json, extract::State};
use lro_core::api::HealthResponse;
use std::sync::Arc;
use tracing::warn;

use crate::state::AppState;

/// Health check endpoint
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let (status, operations) = match state.orchestrator.stats() {
        Ok(stats) => ("healthy", stats),
        Err(e) => {
            warn!(error = %e, "Orchestrator stats unavailable");
            ("degraded", Default::default())
        }
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        operations,
    })
}
