//! Configuration management for lro.
//!
//! Configuration is loaded from multiple sources with precedence:
//! 1. Environment variables (LRO_*)
//! 2. Config file ($LRO_HOME/config.toml, shared with lro-server)
//! 3. Default values

use anyhow::{Context, Result};
use lro_core::client::DEFAULT_SERVER_URL;
use lro_core::{OrchestratorConfig, UpstreamConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// lro-server base URL; derived from `listen_addr` when unset
    pub server_url: Option<String>,

    /// lro-server listen address, shared with the server's config
    pub listen_addr: Option<String>,

    /// Bearer token for lro-server
    pub api_token: Option<String>,

    /// Upstream settings, used by `lro run`
    pub upstream: UpstreamConfig,

    /// Orchestrator settings, used by `lro run`
    pub orchestrator: OrchestratorConfig,
}

impl Config {
    /// Load configuration from file and environment.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let mut config: Config = if config_path.exists() {
            let content =
                std::fs::read_to_string(config_path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            Config::default()
        };

        if let Ok(url) = std::env::var("LRO_SERVER_URL") {
            config.server_url = Some(url);
        }
        if let Ok(token) = std::env::var("LRO_API_TOKEN") {
            config.api_token = Some(token).filter(|t| !t.is_empty());
        }
        if let Ok(endpoint) = std::env::var("LRO_UPSTREAM_ENDPOINT") {
            config.upstream.endpoint = endpoint;
        }
        if let Ok(key) = std::env::var("LRO_UPSTREAM_API_KEY") {
            config.upstream.api_key = Some(key).filter(|k| !k.is_empty());
        }

        Ok(config)
    }

    /// Get the config file path.
    pub fn config_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        std::env::var("LRO_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".lro"))
            .join("config.toml")
    }

    /// Base URL of lro-server.
    pub fn server_url(&self) -> String {
        if let Some(url) = &self.server_url {
            return url.clone();
        }
        match &self.listen_addr {
            Some(addr) => format!("http://{}", addr.replace("0.0.0.0", "127.0.0.1")),
            None => DEFAULT_SERVER_URL.to_string(),
        }
    }
}
