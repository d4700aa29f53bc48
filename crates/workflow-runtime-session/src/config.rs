//! Runtime configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default backend endpoint.
pub const DEFAULT_BACKEND_URL: &str = "ws://127.0.0.1:5000/ws";

const ENV_BACKEND_URL: &str = "WORKFLOW_BACKEND_URL";
const ENV_CONNECT_TIMEOUT: &str = "WORKFLOW_CONNECT_TIMEOUT_SECS";

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
    #[error("Backend URL must use ws:// or wss://: {0}")]
    InvalidUrl(String),
    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Settings for a [`crate::WorkflowRuntime`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Execution backend endpoint.
    pub backend_url: String,
    /// Seconds to wait for the transport to connect.
    pub connect_timeout_secs: u64,
    /// Console entries retained before the oldest are evicted.
    pub log_history_limit: usize,
    /// Capacity of the update broadcast channel.
    pub update_channel_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            connect_timeout_secs: 10,
            log_history_limit: workflow_runtime_core::log_store::DEFAULT_HISTORY_LIMIT,
            update_channel_capacity: 1024,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `WORKFLOW_BACKEND_URL` and
    /// `WORKFLOW_CONNECT_TIMEOUT_SECS`.
    ///
    /// # Errors
    /// Returns error if an override is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Parse from JSON; missing fields take their defaults.
    ///
    /// # Errors
    /// Returns error on malformed JSON or invalid values.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(url) = lookup(ENV_BACKEND_URL) {
            self.backend_url = url;
        }
        if let Some(raw) = lookup(ENV_CONNECT_TIMEOUT) {
            let secs = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: ENV_CONNECT_TIMEOUT,
                value: raw.clone(),
            })?;
            self.connect_timeout_secs = secs;
        }
        self.validate()?;
        Ok(self)
    }

    #[must_use]
    pub fn with_backend_url(mut self, url: impl Into<String>) -> Self {
        self.backend_url = url.into();
        self
    }

    #[must_use]
    pub const fn with_connect_timeout_secs(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// # Errors
    /// Returns error if the URL scheme or a limit is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.backend_url.starts_with("ws://") || self.backend_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidUrl(self.backend_url.clone()));
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "connect_timeout_secs",
                value: "0".to_string(),
            });
        }
        if self.update_channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                key: "update_channel_capacity",
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_overrides() {
        let config = RuntimeConfig::default()
            .with_overrides(env(&[
                (ENV_BACKEND_URL, "wss://exec.local/socket"),
                (ENV_CONNECT_TIMEOUT, " 3 "),
            ]))
            .unwrap();
        assert_eq!(config.backend_url, "wss://exec.local/socket");
        assert_eq!(config.connect_timeout_secs, 3);
    }

    #[test]
    fn test_bad_timeout_override() {
        let err = RuntimeConfig::default()
            .with_overrides(env(&[(ENV_CONNECT_TIMEOUT, "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_rejects_http_url() {
        let config = RuntimeConfig::default().with_backend_url("http://127.0.0.1:5000");
        assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl(_))));
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = RuntimeConfig::from_json(r#"{"connect_timeout_secs": 2}"#).unwrap();
        assert_eq!(config.connect_timeout_secs, 2);
        assert_eq!(config.backend_url, DEFAULT_BACKEND_URL);
    }
}
