use std::sync::Arc;

use http::{HeaderMap, StatusCode};

use crate::{
    core::response::{GatewayResponse, empty},
    metrics::{GatewayMetrics, ROLEGUARD_FORBIDDEN_TOTAL, ROLEGUARD_UNAUTHORIZED_TOTAL},
    ports::token_validator::{TokenValidator, bearer_token},
};

/// Bearer-token check for operator endpoints (`/metrics`, `/roleguard`).
#[derive(Clone)]
pub struct AdminGate {
    validator: Arc<dyn TokenValidator>,
    metrics: Arc<GatewayMetrics>,
}

impl AdminGate {
    pub fn new(validator: Arc<dyn TokenValidator>, metrics: Arc<GatewayMetrics>) -> Self {
        Self { validator, metrics }
    }

    /// `None` when the caller holds an admin-capable token, otherwise the
    /// ready 401 or 403 response.
    pub async fn check(&self, headers: &HeaderMap) -> Option<GatewayResponse> {
        let claims = match bearer_token(headers) {
            Some(token) => self.validator.validate(token).await,
            None => None,
        };
        let Some(claims) = claims else {
            self.metrics.increment(ROLEGUARD_UNAUTHORIZED_TOTAL).await;
            return Some(empty(StatusCode::UNAUTHORIZED));
        };
        if claims.is_admin() {
            return None;
        }
        tracing::debug!(subject = %claims.subject, "Admin endpoint refused");
        self.metrics.increment(ROLEGUARD_FORBIDDEN_TOTAL).await;
        Some(empty(StatusCode::FORBIDDEN))
    }
}
