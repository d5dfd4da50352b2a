//! Listener configuration
//!
//! Loaded from YAML, with the broker URL overridable from the environment.
//! The bearer token never lives in the file; it is read from the variable
//! named by `token_env` when the connection config is built.

use pushsockets::{ConnectionConfig, EnvToken, TokenProvider};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Environment variable that overrides `broker.url`
pub const BROKER_URL_ENV: &str = "BROKER_URL";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Missing environment variable: {0}")]
    EnvVarMissing(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration for the event listener binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Broker endpoint and session tuning
    pub broker: ConnectionConfig,

    /// Destinations to subscribe to, e.g. `/topic/rules`
    pub destinations: Vec<String>,

    /// Environment variable holding the bearer token
    #[serde(default = "default_token_env")]
    pub token_env: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Seconds between status lines in the log
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,
}

fn default_token_env() -> String {
    "BROKER_TOKEN".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_status_interval_secs() -> u64 {
    60
}

impl ListenerConfig {
    /// Load configuration from a YAML file
    ///
    /// `BROKER_URL` replaces `broker.url` when set.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: ListenerConfig = serde_yaml::from_str(&contents)?;

        if let Ok(url) = std::env::var(BROKER_URL_ENV) {
            info!("[Config] Using broker URL from {}", BROKER_URL_ENV);
            config.broker.url = url;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "log_level must be one of: {}",
                LOG_LEVELS.join(", ")
            )));
        }

        if self.destinations.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one destination is required".to_string(),
            ));
        }
        if let Some(bad) = self.destinations.iter().find(|d| !d.starts_with('/')) {
            return Err(ConfigError::ValidationError(format!(
                "destination '{}' must start with '/'",
                bad
            )));
        }

        if self.token_env.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "token_env must not be empty".to_string(),
            ));
        }
        if self.status_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "status_interval_secs must be greater than 0".to_string(),
            ));
        }

        self.broker
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("broker: {}", e)))
    }

    pub fn token_provider(&self) -> EnvToken {
        EnvToken::new(self.token_env.clone())
    }

    /// Broker config with the token filled in from the environment
    pub async fn connection_config(&self) -> Result<ConnectionConfig> {
        let token = self
            .token_provider()
            .token()
            .await
            .ok_or_else(|| ConfigError::EnvVarMissing(self.token_env.clone()))?;
        Ok(self.broker.clone().with_token(token))
    }

    /// Log configuration summary
    pub fn log(&self) {
        info!("Configuration:");
        info!("  Broker URL: {}", self.broker.url);
        info!(
            "  Heart-beat: in {}ms / out {}ms",
            self.broker.heartbeat_incoming_ms, self.broker.heartbeat_outgoing_ms
        );
        info!(
            "  Reconnect: every {}ms, up to {} attempts",
            self.broker.reconnect_delay_ms, self.broker.max_reconnect_attempts
        );
        info!("  Destinations: {}", self.destinations.join(", "));
        info!("  Token from: ${}", self.token_env);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> ListenerConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_defaults_applied() {
        let config = parse(
            r#"
broker:
  url: "wss://broker.example.com/ws"
destinations: ["/topic/rules"]
"#,
        );
        assert_eq!(config.token_env, "BROKER_TOKEN");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.status_interval_secs, 60);
        assert_eq!(config.broker.heartbeat_incoming_ms, 4000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_relative_destination() {
        let config = parse(
            r#"
broker:
  url: "wss://broker.example.com/ws"
destinations: ["topic/rules"]
"#,
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(msg)) if msg.contains("topic/rules")
        ));
    }

    #[test]
    fn test_rejects_bad_log_level() {
        let mut config = parse(
            r#"
broker:
  url: "wss://broker.example.com/ws"
destinations: ["/topic/rules"]
"#,
        );
        config.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_broker_errors_are_wrapped() {
        let config = parse(
            r#"
broker:
  url: "ftp://broker.example.com"
destinations: ["/topic/rules"]
"#,
        );
        match config.validate() {
            Err(ConfigError::ValidationError(msg)) => assert!(msg.starts_with("broker:")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_token_variable() {
        let mut config = parse(
            r#"
broker:
  url: "wss://broker.example.com/ws"
destinations: ["/topic/rules"]
"#,
        );
        config.token_env = "RULE_NOTIFY_TEST_TOKEN_UNSET".to_string();
        assert!(matches!(
            config.connection_config().await,
            Err(ConfigError::EnvVarMissing(var)) if var == "RULE_NOTIFY_TEST_TOKEN_UNSET"
        ));
    }
}
