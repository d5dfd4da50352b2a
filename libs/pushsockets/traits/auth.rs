use async_trait::async_trait;

/// Name of the credential header sent on the handshake and the CONNECT frame
pub const AUTHORIZATION_HEADER: &str = "Authorization";

/// Trait for supplying the bearer token used to authenticate with the broker
///
/// Token acquisition itself (login flows, refresh) lives outside this crate.
/// The connection manager only consumes whatever the provider hands back, and
/// treats `None` or an empty string as "do not attempt a connection".
///
/// # Example
/// ```ignore
/// struct SessionToken {
///     session: Arc<RwLock<Option<String>>>,
/// }
///
/// #[async_trait::async_trait]
/// impl TokenProvider for SessionToken {
///     async fn token(&self) -> Option<String> {
///         self.session.read().clone()
///     }
/// }
/// ```
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Get the current bearer token, if any
    async fn token(&self) -> Option<String>;
}

/// A provider that always returns the same token
#[derive(Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Option<String> {
        Some(self.0.clone()).filter(|t| !t.is_empty())
    }
}

/// A provider that reads the token from an environment variable on every call
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }

    pub fn var(&self) -> &str {
        &self.var
    }
}

#[async_trait]
impl TokenProvider for EnvToken {
    async fn token(&self) -> Option<String> {
        std::env::var(&self.var)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }
}

/// Format a bearer credential for the `Authorization` header
pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}
