//! Configuration for the sync engine

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the sync engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// WebSocket base URL; channels connect to `{ws_base_url}/{paper_id}/{version}`
    pub ws_base_url: String,

    /// HTTP API base URL for import/status/document/metadata endpoints
    pub api_base_url: String,

    /// Timeout applied to each request/response call (default: 30 seconds)
    pub request_timeout: Duration,

    /// Reconnect policy for channels dropped mid-stream
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ws_base_url: "ws://localhost:8001/ws".to_string(),
            api_base_url: "http://localhost:8001/api".to_string(),
            request_timeout: Duration::from_secs(30),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Load config from TOML file
    pub fn from_toml(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.ws_base_url.starts_with("ws://") && !self.ws_base_url.starts_with("wss://") {
            anyhow::bail!("ws_base_url must start with ws:// or wss://");
        }
        if !self.api_base_url.starts_with("http://") && !self.api_base_url.starts_with("https://")
        {
            anyhow::bail!("api_base_url must start with http:// or https://");
        }
        if self.request_timeout.is_zero() {
            anyhow::bail!("request_timeout must be non-zero");
        }
        if self.reconnect.max_delay < self.reconnect.base_delay {
            anyhow::bail!("reconnect.max_delay must be >= reconnect.base_delay");
        }
        Ok(())
    }
}

/// Bounded exponential backoff for channels that drop mid-stream.
///
/// Establishment failures are never retried here; reconnects only cover a
/// stream that was open and then dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Maximum reconnect attempts before the channel gives up (default: 5)
    pub max_attempts: u32,

    /// First retry delay (default: 500ms)
    pub base_delay: Duration,

    /// Delay cap (default: 30 seconds)
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given attempt: `min(base * 2^attempt, cap)` plus up
    /// to 10% jitter so reconnect storms spread out.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)));
        let capped = exp.min(self.max_delay);
        let jitter = rand::thread_rng().gen_range(0.0..=0.1);
        capped.mul_f64(1.0 + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(SyncConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_ws_scheme() {
        let config = SyncConfig {
            ws_base_url: "http://localhost:8001/ws".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let config = SyncConfig {
            request_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = ReconnectPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        };
        // Attempt 20 would be ~145 hours uncapped; jitter adds at most 10%.
        assert!(policy.delay_for(20) <= Duration::from_secs(33));
        assert!(policy.delay_for(0) >= Duration::from_millis(500));
    }
}
