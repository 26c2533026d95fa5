//! Orchestrator configuration
//!
//! Defines polling, caching and upstream connection options.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pinned upstream contract version
pub const DEFAULT_API_VERSION: &str = "2025-05-01-preview";

/// Orchestrator configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Polling policy for long-running operations
    pub poll: PollPolicy,

    /// Result cache / deduplication configuration
    pub cache: CacheConfig,

    /// Maximum number of operations polled concurrently (default: 32)
    pub max_concurrent_polls: usize,

    /// How long an operation with no attached caller keeps polling, in ms (default: 30000)
    pub detach_grace_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll: PollPolicy::default(),
            cache: CacheConfig::default(),
            max_concurrent_polls: 32,
            detach_grace_ms: 30_000,
        }
    }
}

/// Polling policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollPolicy {
    /// Delay before the first poll, in ms (default: 1000)
    pub initial_interval_ms: u64,

    /// Upper bound for any single delay, in ms (default: 10000)
    pub max_interval_ms: u64,

    /// Growth factor applied after each in-progress poll (default: 1.5)
    pub backoff_multiplier: f64,

    /// Poll attempt ceiling (default: 60)
    pub max_attempts: u32,

    /// Wall-clock ceiling measured from submission, in seconds (default: 300)
    pub max_duration_secs: u64,

    /// Use the upstream Retry-After hint when it asks for a longer wait (default: true)
    pub honor_retry_after: bool,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval_ms: 1_000,
            max_interval_ms: 10_000,
            backoff_multiplier: 1.5,
            max_attempts: 60,
            max_duration_secs: 300,
            honor_retry_after: true,
        }
    }
}

impl PollPolicy {
    /// Fixed-interval policy, mostly useful in tests.
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        let ms = interval.as_millis() as u64;
        Self {
            initial_interval_ms: ms,
            max_interval_ms: ms,
            backoff_multiplier: 1.0,
            max_attempts,
            ..Default::default()
        }
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }

    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    /// Delay before poll number `attempt + 1` (0-based attempt count so far).
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let max = self.max_interval_ms as f64;
        let grown = self.initial_interval_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let mut delay = Duration::from_millis(grown.min(max) as u64);

        if self.honor_retry_after {
            if let Some(hint) = retry_after {
                delay = delay.max(hint.min(Duration::from_millis(self.max_interval_ms)));
            }
        }

        delay
    }
}

/// Result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long completed results (and terminal operations) are kept, in seconds (default: 900)
    pub retention_secs: u64,

    /// Maximum number of completed results kept (default: 256)
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            retention_secs: 900, // 15 minutes
            max_entries: 256,
        }
    }
}

impl CacheConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

/// Upstream analysis service connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base endpoint, e.g. https://my-resource.services.ai.azure.com
    pub endpoint: String,

    /// Pinned contract version sent as the api-version query parameter
    pub api_version: String,

    /// Bearer token for the upstream service
    pub api_key: Option<String>,

    /// Per-request timeout in seconds (default: 30)
    pub request_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_version: DEFAULT_API_VERSION.to_string(),
            api_key: None,
            request_timeout_secs: 30,
        }
    }
}

impl UpstreamConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigValidationError::MissingEndpoint);
        }
        if self.api_version.trim().is_empty() {
            return Err(ConfigValidationError::InvalidValue {
                field: "upstream.api_version".into(),
                message: "must not be empty".into(),
            });
        }
        Ok(())
    }
}

impl OrchestratorConfig {
    /// Set the polling policy
    pub fn with_poll(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Set the cache configuration
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_detach_grace(mut self, grace: Duration) -> Self {
        self.detach_grace_ms = grace.as_millis() as u64;
        self
    }

    pub fn detach_grace(&self) -> Duration {
        Duration::from_millis(self.detach_grace_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.poll.max_attempts == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "poll.max_attempts".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.poll.max_interval_ms < self.poll.initial_interval_ms {
            return Err(ConfigValidationError::InvalidValue {
                field: "poll.max_interval_ms".into(),
                message: "must be at least poll.initial_interval_ms".into(),
            });
        }

        if self.poll.backoff_multiplier < 1.0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "poll.backoff_multiplier".into(),
                message: "must be >= 1.0".into(),
            });
        }

        if self.max_concurrent_polls == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "max_concurrent_polls".into(),
                message: "must be greater than 0".into(),
            });
        }

        if self.cache.max_entries == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "cache.max_entries".into(),
                message: "must be greater than 0".into(),
            });
        }

        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("upstream endpoint is required")]
    MissingEndpoint,

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.poll.max_attempts, 60);
        assert_eq!(config.cache.retention_secs, 900);
        assert_eq!(config.max_concurrent_polls, 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = OrchestratorConfig::default();
        config.poll.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = OrchestratorConfig::default();
        config.poll.max_interval_ms = 10;
        assert!(config.validate().is_err());

        let mut config = OrchestratorConfig::default();
        config.cache.max_entries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = PollPolicy::default();
        assert_eq!(policy.delay_for(0, None), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(1, None), Duration::from_millis(1_500));
        assert_eq!(policy.delay_for(30, None), Duration::from_millis(10_000));
    }

    #[test]
    fn test_retry_after_only_lengthens_delay() {
        let policy = PollPolicy::default();
        assert_eq!(
            policy.delay_for(0, Some(Duration::from_secs(3))),
            Duration::from_secs(3)
        );
        assert_eq!(
            policy.delay_for(0, Some(Duration::from_millis(10))),
            Duration::from_millis(1_000)
        );
        // Hint is capped at the max interval
        assert_eq!(
            policy.delay_for(0, Some(Duration::from_secs(120))),
            Duration::from_millis(10_000)
        );
    }

    #[test]
    fn test_retry_after_ignored_when_disabled() {
        let policy = PollPolicy {
            honor_retry_after: false,
            ..Default::default()
        };
        assert_eq!(
            policy.delay_for(0, Some(Duration::from_secs(3))),
            Duration::from_millis(1_000)
        );
    }

    #[test]
    fn test_upstream_validation() {
        assert!(UpstreamConfig::default().validate().is_err());
        let config = UpstreamConfig::new("https://example.test").with_api_key("k");
        assert!(config.validate().is_ok());
        assert_eq!(config.api_version, DEFAULT_API_VERSION);
    }

    #[test]
    fn test_partial_toml_like_json_uses_defaults() {
        let config: OrchestratorConfig =
            serde_json::from_str(r#"{"poll": {"max_attempts": 5}}"#).unwrap();
        assert_eq!(config.poll.max_attempts, 5);
        assert_eq!(config.poll.initial_interval_ms, 1_000);
        assert_eq!(config.cache.max_entries, 256);
    }
}
