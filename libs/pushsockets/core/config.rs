use crate::traits::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use url::Url;

pub const DEFAULT_HEARTBEAT_INCOMING_MS: u64 = 4_000;
pub const DEFAULT_HEARTBEAT_OUTGOING_MS: u64 = 4_000;
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3_000;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Schemes a broker endpoint may use
const SUPPORTED_SCHEMES: &[&str] = &["ws", "wss", "http", "https"];

/// Configuration for one logical broker session
///
/// Supplied to `ConnectionManager::connect` and held until the session ends
/// (explicit disconnect or a new connect with a different config). An empty
/// `url` or `token` turns `connect` into a logged no-op.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Broker endpoint (`ws(s)://` for raw WebSocket, `http(s)://` for SockJS)
    pub url: String,

    /// Bearer token, never read from config files
    #[serde(skip)]
    pub token: String,

    /// Interval we expect heart-beats from the broker, in milliseconds (0 disables)
    #[serde(default = "default_heartbeat_incoming_ms")]
    pub heartbeat_incoming_ms: u64,

    /// Interval we send heart-beats to the broker, in milliseconds (0 disables)
    #[serde(default = "default_heartbeat_outgoing_ms")]
    pub heartbeat_outgoing_ms: u64,

    /// Fixed delay between reconnect attempts, in milliseconds
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// Consecutive failures tolerated before the session fails
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Upper bound on channel negotiation, in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// When false, `connect` and pending reconnects do nothing
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_heartbeat_incoming_ms() -> u64 {
    DEFAULT_HEARTBEAT_INCOMING_MS
}

fn default_heartbeat_outgoing_ms() -> u64 {
    DEFAULT_HEARTBEAT_OUTGOING_MS
}

fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}

fn default_max_reconnect_attempts() -> u32 {
    DEFAULT_MAX_RECONNECT_ATTEMPTS
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_enabled() -> bool {
    true
}

impl ConnectionConfig {
    /// Create a config with default heartbeat and reconnect settings
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            heartbeat_incoming_ms: DEFAULT_HEARTBEAT_INCOMING_MS,
            heartbeat_outgoing_ms: DEFAULT_HEARTBEAT_OUTGOING_MS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            enabled: true,
        }
    }

    /// Create a config whose token comes from a provider
    ///
    /// A provider that yields nothing produces an empty token, which makes
    /// `connect` a no-op rather than an error.
    pub async fn from_provider(url: impl Into<String>, provider: &dyn TokenProvider) -> Self {
        let token = provider.token().await.unwrap_or_default();
        Self::new(url, token)
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    pub fn with_heartbeat(mut self, incoming: Duration, outgoing: Duration) -> Self {
        self.heartbeat_incoming_ms = incoming.as_millis() as u64;
        self.heartbeat_outgoing_ms = outgoing.as_millis() as u64;
        self
    }

    pub fn with_reconnect(mut self, delay: Duration, max_attempts: u32) -> Self {
        self.reconnect_delay_ms = delay.as_millis() as u64;
        self.max_reconnect_attempts = max_attempts;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn heartbeat_incoming(&self) -> Duration {
        Duration::from_millis(self.heartbeat_incoming_ms)
    }

    pub fn heartbeat_outgoing(&self) -> Duration {
        Duration::from_millis(self.heartbeat_outgoing_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Whether `connect` should attempt anything with this config
    pub fn is_usable(&self) -> bool {
        self.enabled && !self.url.is_empty() && !self.token.is_empty()
    }

    /// The reconnect policy this session runs under
    pub fn reconnect_strategy(&self) -> FixedDelay {
        FixedDelay::new(self.reconnect_delay(), Some(self.max_reconnect_attempts))
    }

    /// Build the transport open request for this session
    pub fn open_request(&self) -> OpenRequest {
        OpenRequest {
            url: self.url.clone(),
            authorization: bearer(&self.token),
            heartbeat_incoming: self.heartbeat_incoming(),
            heartbeat_outgoing: self.heartbeat_outgoing(),
            connect_timeout: self.connect_timeout(),
        }
    }

    /// Validate the endpoint and timing values
    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(PushSocketError::Configuration("url must not be empty".into()));
        }
        let url = Url::parse(&self.url)?;
        if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
            return Err(PushSocketError::Configuration(format!(
                "unsupported scheme '{}', expected one of: {}",
                url.scheme(),
                SUPPORTED_SCHEMES.join(", ")
            )));
        }
        if self.connect_timeout_ms == 0 {
            return Err(PushSocketError::Configuration(
                "connect_timeout_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("url", &self.url)
            .field("token", &if self.token.is_empty() { "<empty>" } else { "<redacted>" })
            .field("heartbeat_incoming_ms", &self.heartbeat_incoming_ms)
            .field("heartbeat_outgoing_ms", &self.heartbeat_outgoing_ms)
            .field("reconnect_delay_ms", &self.reconnect_delay_ms)
            .field("max_reconnect_attempts", &self.max_reconnect_attempts)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("enabled", &self.enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectionConfig::new("wss://x", "t1");
        assert_eq!(config.reconnect_delay(), Duration::from_millis(3000));
        assert_eq!(config.max_reconnect_attempts, 5);
        assert!(config.is_usable());
        assert_eq!(config.open_request().authorization, "Bearer t1");
    }

    #[test]
    fn test_empty_token_is_not_usable() {
        assert!(!ConnectionConfig::new("wss://x", "").is_usable());
        assert!(!ConnectionConfig::new("", "t1").is_usable());
        assert!(!ConnectionConfig::new("wss://x", "t1").with_enabled(false).is_usable());
    }

    #[test]
    fn test_validate_scheme() {
        assert!(ConnectionConfig::new("https://broker/ws", "t").validate().is_ok());
        assert!(ConnectionConfig::new("ftp://broker", "t").validate().is_err());
        assert!(ConnectionConfig::new("not a url", "t").validate().is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let rendered = format!("{:?}", ConnectionConfig::new("wss://x", "secret-token"));
        assert!(!rendered.contains("secret-token"));
    }

    #[test]
    fn test_deserialize_applies_defaults() {
        let config: ConnectionConfig =
            serde_json::from_str(r#"{"url":"wss://x","reconnect_delay_ms":500}"#).unwrap();
        assert_eq!(config.reconnect_delay_ms, 500);
        assert_eq!(config.heartbeat_incoming_ms, DEFAULT_HEARTBEAT_INCOMING_MS);
        assert!(config.token.is_empty());
        assert!(config.enabled);
    }
}
