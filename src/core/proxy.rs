//! Longest-prefix reverse proxy.
//!
//! [`ReverseProxy::try_proxy`] matches a request against the route table and,
//! on a hit, runs it through the rate limiter and the circuit breaker before
//! forwarding it upstream. A miss returns `None` so the caller can answer 404.
use std::sync::Arc;

use axum::body::Body as AxumBody;
use http::{HeaderName, Request, StatusCode, Uri, header};
use url::Url;

use crate::{
    core::{
        GatewayRequest,
        circuit_breaker::CircuitBreaker,
        path_match::join_upstream,
        response::{GatewayResponse, text},
        route_table::{HttpVerb, Route, RouteTable},
    },
    metrics,
    ports::{
        http_client::HttpClient,
        rate_limiter::RateLimiter,
        token_validator::{TokenValidator, bearer_token},
    },
};

pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 60;
pub const ANONYMOUS_CLIENT: &str = "anonymous";

/// Headers the HTTP client regenerates itself.
const HOP_BY_HOP: [HeaderName; 5] = [
    header::HOST,
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::CONNECTION,
    header::EXPECT,
];

pub struct ReverseProxy {
    routes: Arc<RouteTable>,
    breaker: Arc<CircuitBreaker>,
    http_client: Arc<dyn HttpClient>,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
    identity: Option<Arc<dyn TokenValidator>>,
    default_rate_limit: u32,
}

impl ReverseProxy {
    pub fn new(
        routes: Arc<RouteTable>,
        breaker: Arc<CircuitBreaker>,
        http_client: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            routes,
            breaker,
            http_client,
            rate_limiter: None,
            identity: None,
            default_rate_limit: DEFAULT_RATE_LIMIT_PER_MINUTE,
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>, default_limit: u32) -> Self {
        self.rate_limiter = Some(limiter);
        self.default_rate_limit = default_limit;
        self
    }

    /// Validator used to turn a bearer token into a rate-limit client id.
    pub fn with_identity(mut self, validator: Arc<dyn TokenValidator>) -> Self {
        self.identity = Some(validator);
        self
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Drop rate-limit and breaker state left behind by a deleted or edited
    /// route. `current` is the route as it now stands; state that still
    /// applies to it is kept.
    pub async fn forget_route(&self, route_id: &str, current: Option<&Route>) {
        if let Some(limiter) = &self.rate_limiter {
            let keep = current.map(|route| route.rate_limit.unwrap_or(self.default_rate_limit));
            limiter.forget_route(route_id, keep).await;
        }
        let keep = current
            .and_then(|route| UpstreamTarget::resolve(route, &route.path, None))
            .map(|upstream| upstream.breaker_key(route_id));
        self.breaker.forget_route(route_id, keep.as_deref()).await;
    }

    pub async fn try_proxy(&self, req: &GatewayRequest) -> Option<GatewayResponse> {
        let verb = HttpVerb::from_method(req.method())?;
        let path = req.uri().path();
        let route = self.routes.find_proxy_route(verb, path).await?;

        let upstream = match UpstreamTarget::resolve(&route, path, req.uri().query()) {
            Some(upstream) => upstream,
            None => {
                tracing::warn!(
                    route.id = %route.id,
                    route.target = %route.target,
                    "Route target is not a usable http(s) URL"
                );
                return Some(text(StatusCode::BAD_GATEWAY, "bad gateway"));
            }
        };

        if let Some(limiter) = &self.rate_limiter {
            let client_id = self.client_id(req).await;
            let limit = route.rate_limit.unwrap_or(self.default_rate_limit);
            if !limiter.allow(&route.id, &client_id, limit).await {
                tracing::debug!(route.id = %route.id, client = %client_id, "Rate limited");
                return Some(text(StatusCode::TOO_MANY_REQUESTS, "too many requests"));
            }
        }

        let breaker_key = upstream.breaker_key(&route.id);
        if !self.breaker.allow(&breaker_key).await {
            tracing::debug!(breaker.key = %breaker_key, "Circuit open, refusing to forward");
            return Some(text(StatusCode::SERVICE_UNAVAILABLE, "service unavailable"));
        }

        Some(self.forward(req, &route, upstream, breaker_key).await)
    }

    async fn client_id(&self, req: &GatewayRequest) -> String {
        let Some(validator) = &self.identity else {
            return ANONYMOUS_CLIENT.to_string();
        };
        match bearer_token(req.headers()) {
            Some(token) => validator
                .validate(token)
                .await
                .map(|claims| claims.subject)
                .unwrap_or_else(|| ANONYMOUS_CLIENT.to_string()),
            None => ANONYMOUS_CLIENT.to_string(),
        }
    }

    async fn forward(
        &self,
        req: &GatewayRequest,
        route: &Route,
        upstream: UpstreamTarget,
        breaker_key: String,
    ) -> GatewayResponse {
        let outgoing = match build_upstream_request(req, upstream.uri) {
            Ok(outgoing) => outgoing,
            Err(e) => {
                // Admitted but never sent: release the trial request slot as a failure.
                self.breaker.record_failure(&breaker_key).await;
                tracing::error!(route.id = %route.id, "Failed to build upstream request: {}", e);
                return text(StatusCode::BAD_GATEWAY, "bad gateway");
            }
        };

        tracing::info!(
            route.id = %route.id,
            upstream = %upstream.url,
            "Forwarding {} {}",
            req.method(),
            req.uri().path()
        );

        let pending = PendingOutcome::new(self.breaker.clone(), breaker_key);
        let result = self.http_client.send_request(outgoing).await;
        let breaker_key = pending.settle();

        match result {
            Ok(response) => {
                self.breaker.record_success(&breaker_key).await;
                metrics::increment_upstream_request_total(&route.id, response.status().as_u16());
                response
            }
            Err(e) => {
                self.breaker.record_failure(&breaker_key).await;
                metrics::increment_upstream_request_total(&route.id, 502);
                tracing::warn!(route.id = %route.id, upstream = %upstream.url, "Upstream request failed: {}", e);
                text(StatusCode::BAD_GATEWAY, "bad gateway")
            }
        }
    }
}

/// A resolved upstream address for one request.
struct UpstreamTarget {
    url: Url,
    uri: Uri,
}

impl UpstreamTarget {
    /// `target` + path suffix beyond the route prefix + the original query.
    /// `None` when the result has no http(s) scheme or no host.
    fn resolve(route: &Route, path: &str, query: Option<&str>) -> Option<Self> {
        let suffix = path.get(route.path.len()..).unwrap_or_default();
        let mut joined = join_upstream(&route.target, suffix);
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            joined.push('?');
            joined.push_str(query);
        }

        let url = Url::parse(&joined).ok()?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return None;
        }
        let uri = joined.parse::<Uri>().ok()?;
        Some(Self { url, uri })
    }

    fn breaker_key(&self, route_id: &str) -> String {
        format!(
            "{route_id}::{}://{}",
            self.url.scheme(),
            self.url.host_str().unwrap_or_default()
        )
    }
}

fn build_upstream_request(req: &GatewayRequest, uri: Uri) -> http::Result<Request<AxumBody>> {
    let mut builder = Request::builder().method(req.method().clone()).uri(uri);
    for (name, value) in req.headers() {
        if HOP_BY_HOP.contains(name) {
            continue;
        }
        builder = builder.header(name, value);
    }
    builder.body(AxumBody::from(req.body().clone()))
}

/// Records a breaker failure if the forwarding future is dropped before the
/// upstream call settles (client disconnect, server shutdown).
struct PendingOutcome {
    breaker: Arc<CircuitBreaker>,
    key: Option<String>,
}

impl PendingOutcome {
    fn new(breaker: Arc<CircuitBreaker>, key: String) -> Self {
        Self {
            breaker,
            key: Some(key),
        }
    }

    fn settle(mut self) -> String {
        self.key.take().unwrap_or_default()
    }
}

impl Drop for PendingOutcome {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        tracing::debug!(breaker.key = %key, "Upstream call cancelled");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let breaker = self.breaker.clone();
            handle.spawn(async move { breaker.record_failure(&key).await });
        }
    }
}
