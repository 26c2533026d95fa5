//! Server configuration.
//!
//! Precedence: environment > `config.toml` > defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use lro_core::{OrchestratorConfig, UpstreamConfig};
use serde::{Deserialize, Serialize};

/// Default listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:7878";

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Settings read from `config.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub listen_addr: String,
    pub api_token: Option<String>,
    pub log_format: LogFormat,
    pub janitor_interval_secs: u64,
    pub upstream: UpstreamConfig,
    pub orchestrator: OrchestratorConfig,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            api_token: None,
            log_format: LogFormat::Text,
            janitor_interval_secs: 30,
            upstream: UpstreamConfig::default(),
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to configuration file
    pub config_path: PathBuf,
    pub listen_addr: SocketAddr,
    /// Bearer token required on /api routes, if set
    pub api_token: Option<String>,
    pub log_format: LogFormat,
    pub janitor_interval_secs: u64,
    pub upstream: UpstreamConfig,
    pub orchestrator: OrchestratorConfig,
}

impl Config {
    /// Load configuration from `$LRO_HOME/config.toml` (default `~/.lro/`)
    /// with environment overrides.
    ///
    /// ```text
    /// ~/.lro/
    /// └── config.toml    # listen_addr, api_token, [upstream], [orchestrator]
    /// ```
    pub fn load() -> anyhow::Result<Self> {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let lro_dir = std::env::var("LRO_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join(".lro"));

        std::fs::create_dir_all(&lro_dir)
            .with_context(|| format!("Failed to create {}", lro_dir.display()))?;

        Self::load_from(&lro_dir.join("config.toml"))
    }

    /// Load from an explicit file path; a missing file means defaults.
    pub fn load_from(config_path: &Path) -> anyhow::Result<Self> {
        let mut file = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            toml::from_str::<FileConfig>(&content)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?
        } else {
            FileConfig::default()
        };

        if let Ok(addr) = std::env::var("LRO_LISTEN_ADDR") {
            file.listen_addr = addr;
        }
        if let Ok(token) = std::env::var("LRO_API_TOKEN") {
            file.api_token = Some(token).filter(|t| !t.is_empty());
        }
        if let Ok(format) = std::env::var("LRO_LOG_FORMAT") {
            file.log_format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Text,
            };
        }
        if let Ok(endpoint) = std::env::var("LRO_UPSTREAM_ENDPOINT") {
            file.upstream.endpoint = endpoint;
        }
        if let Ok(key) = std::env::var("LRO_UPSTREAM_API_KEY") {
            file.upstream.api_key = Some(key).filter(|k| !k.is_empty());
        }

        let listen_addr = file
            .listen_addr
            .parse()
            .with_context(|| format!("Invalid listen address '{}'", file.listen_addr))?;
        file.orchestrator
            .validate()
            .context("Invalid orchestrator configuration")?;

        Ok(Self {
            config_path: config_path.to_path_buf(),
            listen_addr,
            api_token: file.api_token,
            log_format: file.log_format,
            janitor_interval_secs: file.janitor_interval_secs.max(1),
            upstream: file.upstream,
            orchestrator: file.orchestrator,
        })
    }
}
