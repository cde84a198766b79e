//! Decision overlay evaluated after the prepare chain.
//!
//! Each [`DecisionEvaluator`] returns a verdict for the request; the
//! [`DecisionOrchestrator`] folds them: any `Deny` wins, otherwise the first
//! `Escalate`, otherwise `Allow`.
use std::{collections::BTreeSet, sync::Arc};

use async_trait::async_trait;
use http::Method;
use serde::Serialize;

use crate::core::{GatewayRequest, path_match::matches_prefix};

pub const SERVICE_TOKEN_HEADER: &str = "x-service-token";
pub const MANUAL_APPROVAL_HEADER: &str = "x-manual-approval";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny { reason: String, evaluator: String },
    Escalate { reason: String, evaluator: String },
}

#[async_trait]
pub trait DecisionEvaluator: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn evaluate(&self, req: &GatewayRequest) -> Decision;
}

#[derive(Default)]
pub struct DecisionOrchestrator {
    evaluators: Vec<Arc<dyn DecisionEvaluator>>,
}

impl DecisionOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn DecisionEvaluator>) -> Self {
        self.evaluators.push(evaluator);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.evaluators.is_empty()
    }

    pub async fn decide(&self, req: &GatewayRequest) -> Decision {
        let mut escalation = None;
        for evaluator in &self.evaluators {
            match evaluator.evaluate(req).await {
                Decision::Allow => {}
                deny @ Decision::Deny { .. } => {
                    tracing::info!(evaluator = evaluator.name(), "Request denied");
                    return deny;
                }
                escalate @ Decision::Escalate { .. } => {
                    if escalation.is_none() {
                        escalation = Some(escalate);
                    }
                }
            }
        }
        escalation.unwrap_or(Decision::Allow)
    }
}

/// Guards destructive verbs on sensitive path prefixes.
///
/// A privileged service token or an explicit manual approval lets the call
/// through; an unrecognised service token is denied; everything else is
/// escalated for a human to confirm.
pub struct DestructiveGuardian {
    sensitive_prefixes: Vec<String>,
    privileged_tokens: BTreeSet<String>,
}

impl DestructiveGuardian {
    pub fn new(
        sensitive_prefixes: impl IntoIterator<Item = String>,
        privileged_tokens: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            sensitive_prefixes: sensitive_prefixes.into_iter().collect(),
            privileged_tokens: privileged_tokens.into_iter().collect(),
        }
    }

    fn is_destructive(method: &Method) -> bool {
        matches!(*method, Method::DELETE | Method::PUT | Method::PATCH)
    }

    fn is_sensitive(&self, path: &str) -> bool {
        self.sensitive_prefixes
            .iter()
            .any(|prefix| matches_prefix(path, prefix))
    }
}

#[async_trait]
impl DecisionEvaluator for DestructiveGuardian {
    fn name(&self) -> &'static str {
        "guardian"
    }

    async fn evaluate(&self, req: &GatewayRequest) -> Decision {
        if !Self::is_destructive(req.method()) || !self.is_sensitive(req.uri().path()) {
            return Decision::Allow;
        }

        let headers = req.headers();
        if let Some(token) = headers
            .get(SERVICE_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if self.privileged_tokens.contains(token) {
                return Decision::Allow;
            }
            return Decision::Deny {
                reason: "guardian".to_string(),
                evaluator: self.name().to_string(),
            };
        }

        let approved = headers
            .get(MANUAL_APPROVAL_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));
        if approved {
            return Decision::Allow;
        }

        Decision::Escalate {
            reason: "destructive operation requires approval".to_string(),
            evaluator: self.name().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::Request;

    use super::*;

    fn request(method: Method, path: &str, headers: &[(&str, &str)]) -> GatewayRequest {
        let mut builder = Request::builder().method(method).uri(path);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Bytes::new()).unwrap()
    }

    fn guardian() -> DestructiveGuardian {
        DestructiveGuardian::new(
            ["/routes".to_string(), "/zones".to_string()],
            ["svc-secret".to_string()],
        )
    }

    struct Fixed(Decision);

    #[async_trait]
    impl DecisionEvaluator for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn evaluate(&self, _req: &GatewayRequest) -> Decision {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn test_guardian_ignores_safe_requests() {
        let g = guardian();
        assert_eq!(g.evaluate(&request(Method::GET, "/routes", &[])).await, Decision::Allow);
        assert_eq!(g.evaluate(&request(Method::DELETE, "/svc/x", &[])).await, Decision::Allow);
    }

    #[tokio::test]
    async fn test_guardian_tokens_and_approval() {
        let g = guardian();
        let privileged = request(Method::DELETE, "/routes/r1", &[(SERVICE_TOKEN_HEADER, "svc-secret")]);
        assert_eq!(g.evaluate(&privileged).await, Decision::Allow);

        let unknown = request(Method::DELETE, "/routes/r1", &[(SERVICE_TOKEN_HEADER, "guess")]);
        assert!(matches!(g.evaluate(&unknown).await, Decision::Deny { reason, .. } if reason == "guardian"));

        let approved = request(Method::PUT, "/zones/z", &[(MANUAL_APPROVAL_HEADER, "true")]);
        assert_eq!(g.evaluate(&approved).await, Decision::Allow);

        let bare = request(Method::PATCH, "/zones/z", &[]);
        assert!(matches!(g.evaluate(&bare).await, Decision::Escalate { .. }));
    }

    #[tokio::test]
    async fn test_orchestrator_deny_beats_escalate() {
        let escalate = Decision::Escalate {
            reason: "check".to_string(),
            evaluator: "a".to_string(),
        };
        let deny = Decision::Deny {
            reason: "no".to_string(),
            evaluator: "b".to_string(),
        };
        let orchestrator = DecisionOrchestrator::new()
            .with_evaluator(Arc::new(Fixed(escalate.clone())))
            .with_evaluator(Arc::new(Fixed(deny.clone())));
        let req = request(Method::GET, "/", &[]);
        assert_eq!(orchestrator.decide(&req).await, deny);

        let orchestrator = DecisionOrchestrator::new()
            .with_evaluator(Arc::new(Fixed(Decision::Allow)))
            .with_evaluator(Arc::new(Fixed(escalate.clone())));
        assert_eq!(orchestrator.decide(&req).await, escalate);

        assert_eq!(DecisionOrchestrator::new().decide(&req).await, Decision::Allow);
    }
}
