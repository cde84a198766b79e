use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    core::{
        GatewayRequest,
        plugin::{GatewayPlugin, PluginError, PluginResult},
        role_guard::{GuardDecision, RoleGuardStore},
    },
    metrics::{GatewayMetrics, ROLEGUARD_FORBIDDEN_TOTAL, ROLEGUARD_UNAUTHORIZED_TOTAL},
    ports::token_validator::{TokenValidator, bearer_token},
};

/// Enforces RoleGuard rules in the prepare chain.
pub struct RoleGuardPlugin {
    store: Arc<RoleGuardStore>,
    validator: Arc<dyn TokenValidator>,
    metrics: Arc<GatewayMetrics>,
}

impl RoleGuardPlugin {
    pub fn new(
        store: Arc<RoleGuardStore>,
        validator: Arc<dyn TokenValidator>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            store,
            validator,
            metrics,
        }
    }
}

#[async_trait]
impl GatewayPlugin for RoleGuardPlugin {
    fn name(&self) -> &'static str {
        "roleguard"
    }

    async fn prepare(&self, req: GatewayRequest) -> PluginResult<GatewayRequest> {
        let path = req.uri().path();
        // Skip token validation entirely when no rule covers the request.
        if self.store.requirement_for(req.method(), path).is_none() {
            return Ok(req);
        }

        let claims = match bearer_token(req.headers()) {
            Some(token) => self.validator.validate(token).await,
            None => None,
        };

        match self.store.evaluate(claims.as_ref(), req.method(), path) {
            GuardDecision::Allow => Ok(req),
            GuardDecision::Unauthorized => {
                self.metrics.increment(ROLEGUARD_UNAUTHORIZED_TOTAL).await;
                tracing::debug!(path = %path, "RoleGuard: missing or invalid token");
                Err(PluginError::Unauthorized)
            }
            GuardDecision::Forbidden => {
                self.metrics.increment(ROLEGUARD_FORBIDDEN_TOTAL).await;
                tracing::debug!(path = %path, "RoleGuard: access forbidden");
                Err(PluginError::Forbidden)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::{Request, header};

    use super::*;
    use crate::{adapters::token_validator::HmacTokenValidator, core::role_guard::parse_rules};

    fn plugin(validator: Arc<HmacTokenValidator>, metrics: Arc<GatewayMetrics>) -> RoleGuardPlugin {
        let rules = parse_rules("rules:\n  /admin: admin\n  /blocked:\n    deny: true\n").unwrap();
        RoleGuardPlugin::new(Arc::new(RoleGuardStore::from_rules(rules)), validator, metrics)
    }

    fn request(path: &str, token: Option<&str>) -> GatewayRequest {
        let mut builder = Request::builder().uri(path);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Bytes::new()).unwrap()
    }

    #[tokio::test]
    async fn test_guard_outcomes_and_counters() {
        let validator = Arc::new(HmacTokenValidator::new("k"));
        let metrics = Arc::new(GatewayMetrics::new());
        let guard = plugin(validator.clone(), metrics.clone());
        let admin = validator.sign("root", Some("admin"), &[], None).unwrap();
        let user = validator.sign("joe", Some("user"), &[], None).unwrap();

        assert!(guard.prepare(request("/open", None)).await.is_ok());
        assert!(guard.prepare(request("/admin/x", Some(&admin))).await.is_ok());
        assert!(matches!(
            guard.prepare(request("/admin/x", None)).await,
            Err(PluginError::Unauthorized)
        ));
        assert!(matches!(
            guard.prepare(request("/admin/x", Some("garbage"))).await,
            Err(PluginError::Unauthorized)
        ));
        assert!(matches!(
            guard.prepare(request("/admin", Some(&user))).await,
            Err(PluginError::Forbidden)
        ));
        assert!(matches!(
            guard.prepare(request("/blocked", Some(&admin))).await,
            Err(PluginError::Forbidden)
        ));

        assert_eq!(metrics.get(ROLEGUARD_UNAUTHORIZED_TOTAL).await, 2);
        assert_eq!(metrics.get(ROLEGUARD_FORBIDDEN_TOTAL).await, 2);
    }
}
