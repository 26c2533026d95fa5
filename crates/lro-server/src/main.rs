//! lro-server - Analysis operation orchestrator server
//!
//! REST API over TCP.

use std::sync::Arc;

use anyhow::Context;
use lro_core::{HttpAnalysisService, HttpBlobStore, Orchestrator};
use lro_server::config::{Config, LogFormat};
use lro_server::services::JanitorService;
use lro_server::{AppState, create_router};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration before logging so the format can be chosen
    let config = Config::load()?;

    // Initialize logging
    let filter = EnvFilter::from_default_env()
        .add_directive("lro_server=info".parse()?)
        .add_directive("lro_core=info".parse()?);
    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init(),
    }

    info!("lro-server v{}", env!("CARGO_PKG_VERSION"));
    info!("Config loaded from {:?}", config.config_path);

    let service = HttpAnalysisService::new(&config.upstream)
        .context("Upstream analysis service is not configured (set LRO_UPSTREAM_ENDPOINT)")?;
    let blobs = HttpBlobStore::new(std::time::Duration::from_secs(
        config.upstream.request_timeout_secs,
    ))?;
    let orchestrator = Orchestrator::new(
        config.orchestrator.clone(),
        Arc::new(service),
        Arc::new(blobs),
    )?;

    let listen_addr = config.listen_addr;
    let janitor_interval = config.janitor_interval_secs;
    if config.api_token.is_none() {
        info!("No API token configured; /api routes are unauthenticated");
    }

    let state = AppState::new(config, orchestrator);
    let janitor = Arc::new(JanitorService::new(state.clone()));
    Arc::clone(&janitor).start(janitor_interval).await;

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", listen_addr))?;
    info!("Listening on {}", listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down...");
        })
        .await?;

    janitor.stop().await;
    Ok(())
}
