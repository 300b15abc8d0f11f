use crate::types::{ChorusError, Result};
use futures_util::future::BoxFuture;

/// Token supply as a capability.
///
/// Guest-session bootstrapping, key vaults and rotation loops live behind
/// this seam; the streaming core only ever asks for a bearer token and is
/// told when one cannot be produced. Rotation failures surface as plain
/// errors and feed the normal attempt tiers, nothing more.
pub trait AuthProvider: Send + Sync {
    /// Current bearer token, or `None` when the endpoint needs no auth.
    fn token(&self) -> BoxFuture<'_, Result<Option<String>>>;

    /// Nudge after the upstream rejected the current token (401/403/429).
    fn rotate(&self) -> BoxFuture<'_, Result<()>>;
}

/// Fixed-key provider for endpoints with a long-lived API key, and the
/// anonymous case for local or unauthenticated hosts.
pub struct StaticToken {
    token: Option<String>,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self { token: None }
    }
}

impl AuthProvider for StaticToken {
    fn token(&self) -> BoxFuture<'_, Result<Option<String>>> {
        let token = self.token.clone();
        Box::pin(async move { Ok(token) })
    }

    fn rotate(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            Err(ChorusError::Auth("static token cannot be rotated".to_string()).into())
        })
    }
}
