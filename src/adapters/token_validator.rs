//! HS256 bearer token validation.
//!
//! Tokens are compact JWTs checked with `jsonwebtoken` pinned to HS256; any
//! other `alg` in the header is rejected. Claims read: `sub` (required),
//! `role`, `scopes` (array) or `scope` (space separated). `exp` and `nbf` are
//! optional but enforced without leeway when present.
use std::collections::BTreeSet;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::ports::token_validator::{AdminClaims, TokenValidator};

#[derive(Serialize, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scopes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    nbf: Option<i64>,
}

pub struct HmacTokenValidator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl HmacTokenValidator {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        let secret = secret.into();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["sub"]);
        validation.validate_nbf = true;
        validation.leeway = 0;
        Self {
            encoding_key: EncodingKey::from_secret(&secret),
            decoding_key: DecodingKey::from_secret(&secret),
            validation,
        }
    }

    /// Issue a token for `subject`. Used by tooling and tests.
    pub fn sign(
        &self,
        subject: &str,
        role: Option<&str>,
        scopes: &[&str],
        expires_at: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Option<String> {
        let claims = Claims {
            sub: subject.to_string(),
            role: role.map(str::to_string),
            scopes: (!scopes.is_empty()).then(|| scopes.iter().map(|s| s.to_string()).collect()),
            scope: None,
            exp: expires_at.map(|at| at.timestamp()),
            nbf: None,
        };
        match encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key) {
            Ok(token) => Some(token),
            Err(e) => {
                tracing::error!("Failed to encode token: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl TokenValidator for HmacTokenValidator {
    async fn validate(&self, token: &str) -> Option<AdminClaims> {
        let claims = match decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => data.claims,
            Err(e) => {
                tracing::debug!(error = %e, "Rejected bearer token");
                return None;
            }
        };

        let mut scopes: BTreeSet<String> = claims.scopes.unwrap_or_default().into_iter().collect();
        if let Some(scope) = claims.scope {
            scopes.extend(scope.split_whitespace().map(str::to_string));
        }

        Some(AdminClaims {
            subject: claims.sub,
            role: claims.role,
            scopes,
        })
    }
}

/// Validator used when no signing secret is configured: every token fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectAllValidator;

#[async_trait]
impl TokenValidator for RejectAllValidator {
    async fn validate(&self, _token: &str) -> Option<AdminClaims> {
        None
    }
}
