//! Authentication boundary.
//!
//! Token issuance lives with the main notes service; this edge only
//! verifies bearer tokens through [`TokenVerifier`] and attaches the
//! resolved [`AuthUser`] as a request extension.

pub mod middleware;

use async_trait::async_trait;
use uuid::Uuid;

pub use middleware::auth_middleware;

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub username: String,
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Resolve a bearer token to a user, or `None` when it does not verify.
    async fn verify(&self, token: &str) -> Option<AuthUser>;
}

/// Single-token verifier for personal deployments: one shared bearer token
/// configured at startup maps to the owning user.
#[derive(Debug, Clone)]
pub struct StaticTokenVerifier {
    token: String,
    user: AuthUser,
}

impl StaticTokenVerifier {
    pub fn new(token: impl Into<String>, user: AuthUser) -> Self {
        Self {
            token: token.into(),
            user,
        }
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Option<AuthUser> {
        if !self.token.is_empty() && token == self.token {
            Some(self.user.clone())
        } else {
            None
        }
    }
}
