//! Access-token sources for authenticated connections

use async_trait::async_trait;

/// Supplies the bearer token attached to connections and requests
///
/// The stream resolves the token immediately before every connection
/// attempt, so a provider backed by a refreshing session always hands out
/// a current token. Returning `None` means no session is available; the
/// stream treats that as an authentication failure rather than retrying
/// blindly.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current access token, if any.
    async fn access_token(&self) -> Option<String>;
}

/// Fixed token, handed over at construction
///
/// Suitable for CLI invocations and tests where the token lives as long
/// as the process.
#[derive(Debug, Clone)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Option<String> {
        Some(self.token.clone())
    }
}

/// Token read from an environment variable on every resolution
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

#[async_trait]
impl TokenProvider for EnvToken {
    async fn access_token(&self) -> Option<String> {
        std::env::var(&self.var).ok().filter(|t| !t.is_empty())
    }
}
