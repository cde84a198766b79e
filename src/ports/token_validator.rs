use std::collections::BTreeSet;

use async_trait::async_trait;
use http::{HeaderMap, header};
use serde::Serialize;

/// Identity extracted from a validated bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdminClaims {
    pub subject: String,
    pub role: Option<String>,
    pub scopes: BTreeSet<String>,
}

impl AdminClaims {
    /// Admin capability: `role == "admin"` or an `admin` scope.
    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some("admin") || self.scopes.contains("admin")
    }
}

/// TokenValidator defines the port for bearer token validation.
#[async_trait]
pub trait TokenValidator: Send + Sync + 'static {
    /// Returns the token's claims, or `None` when the token is invalid or expired.
    async fn validate(&self, token: &str) -> Option<AdminClaims>;
}

/// Extract the raw token from an `Authorization: Bearer ...` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
