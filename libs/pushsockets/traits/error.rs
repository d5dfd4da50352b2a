use thiserror::Error;

/// Substrings that mark a broker failure as an authentication problem.
///
/// Matched case-insensitively against the broker's error text.
const AUTH_FAILURE_MARKERS: &[&str] = &[
    "authentication",
    "unauthorized",
    "unauthenticated",
    "forbidden",
    "invalid token",
    "expired token",
    "token expired",
    "access denied",
];

/// Main error type for pushsockets
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PushSocketError {
    /// Socket-level failure (refused, reset, timeout, heartbeat silence)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Broker failure frame unrelated to authentication
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Broker rejected the credentials
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Consecutive failures reached the configured maximum
    #[error("Reconnection failed after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed STOMP or SockJS frame
    #[error("Frame error: {0}")]
    Frame(String),

    /// Message body is not a valid envelope
    #[error("Envelope error: {0}")]
    Envelope(String),

    /// No live transport to send through
    #[error("Not connected")]
    NotConnected,

    /// Channel send error
    #[error("Channel send error: {0}")]
    ChannelSend(String),
}

impl PushSocketError {
    /// Classify a broker-level error frame by its message text.
    ///
    /// Returns [`PushSocketError::Authentication`] when the text mentions an
    /// authentication or authorization failure, otherwise
    /// [`PushSocketError::Protocol`].
    pub fn classify_protocol(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        if is_auth_failure(&detail) {
            Self::Authentication(detail)
        } else {
            Self::Protocol(detail)
        }
    }

    /// Whether this error ends the session without a reconnect
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Authentication(_) | Self::RetriesExhausted { .. } | Self::Configuration(_)
        )
    }

    /// Whether this error came from the broker rejecting credentials
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }
}

/// Check whether a broker error text describes an authentication failure
pub fn is_auth_failure(detail: &str) -> bool {
    let lowered = detail.to_lowercase();
    AUTH_FAILURE_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

impl From<serde_json::Error> for PushSocketError {
    fn from(e: serde_json::Error) -> Self {
        Self::Envelope(e.to_string())
    }
}

impl From<url::ParseError> for PushSocketError {
    fn from(e: url::ParseError) -> Self {
        Self::Configuration(format!("invalid url: {e}"))
    }
}

/// Result type for pushsockets operations
pub type Result<T> = std::result::Result<T, PushSocketError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_classification() {
        assert!(PushSocketError::classify_protocol("authentication failed").is_auth());
        assert!(PushSocketError::classify_protocol("401 Unauthorized").is_auth());
        assert!(PushSocketError::classify_protocol("Access Denied for user").is_auth());
        assert!(!PushSocketError::classify_protocol("destination not found").is_auth());
        assert!(!PushSocketError::classify_protocol("").is_auth());
    }

    #[test]
    fn test_fatality() {
        assert!(PushSocketError::Authentication("x".into()).is_fatal());
        assert!(PushSocketError::RetriesExhausted { attempts: 5 }.is_fatal());
        assert!(!PushSocketError::Transport("reset".into()).is_fatal());
        assert!(!PushSocketError::Protocol("boom".into()).is_fatal());
    }
}
