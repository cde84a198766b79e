use std::sync::Arc;

use axum::body::Body as AxumBody;
use http::{HeaderMap, HeaderValue, Method, Request, StatusCode, Uri, header, uri::PathAndQuery};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use tracing::Instrument;

use crate::{
    adapters::{fallback::FallbackHandler, plugins::REQUEST_ID_HEADER},
    core::{
        GatewayRequest,
        decision::{Decision, DecisionOrchestrator},
        path_match::normalize_path,
        plugin::{GatewayPlugin, PluginError},
        response::{GatewayResponse, empty, error_json, json},
    },
    metrics::{GatewayMetrics, RequestTimer},
    tracing_setup::create_request_span,
    utils::{RecentRequest, RecentRequests},
};

const PREFLIGHT_METHODS: &str = "GET,POST,PUT,PATCH,DELETE,OPTIONS";
const PREFLIGHT_HEADERS: &str = "Content-Type, Authorization";
const PREFLIGHT_MAX_AGE: &str = "600";

pub const DEFAULT_MAX_BODY: usize = 10 * 1024 * 1024;

/// What finalization needs to know about a request after the pipeline has
/// consumed it.
struct RequestInfo {
    method: Method,
    /// Request target as received, query included.
    path: String,
    origin: Option<HeaderValue>,
    request_id: Option<HeaderValue>,
    timer: RequestTimer,
}

impl RequestInfo {
    fn capture(method: &Method, uri: &Uri, headers: &HeaderMap) -> Self {
        let path = uri
            .path_and_query()
            .map(PathAndQuery::as_str)
            .unwrap_or_else(|| uri.path());
        Self {
            method: method.clone(),
            path: path.to_string(),
            origin: headers.get(header::ORIGIN).cloned(),
            request_id: headers.get(REQUEST_ID_HEADER).cloned(),
            timer: RequestTimer::new(method.as_str()),
        }
    }
}

/// Gateway dispatcher: runs every inbound request through the plugin
/// pipeline, the decision overlay and the built-in endpoints.
#[derive(Clone)]
pub struct HttpHandler {
    plugins: Vec<Arc<dyn GatewayPlugin>>,
    orchestrator: Option<Arc<DecisionOrchestrator>>,
    fallback: Arc<FallbackHandler>,
    metrics: Arc<GatewayMetrics>,
    recent: Arc<RecentRequests>,
    max_body: usize,
}

impl HttpHandler {
    pub fn new(fallback: Arc<FallbackHandler>, metrics: Arc<GatewayMetrics>) -> Self {
        Self {
            plugins: Vec::new(),
            orchestrator: None,
            fallback,
            metrics,
            recent: Arc::new(RecentRequests::default()),
            max_body: DEFAULT_MAX_BODY,
        }
    }

    /// Register a plugin; registration order is prepare order.
    pub fn with_plugin(mut self, plugin: Arc<dyn GatewayPlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn with_orchestrator(mut self, orchestrator: Arc<DecisionOrchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    pub fn with_recent_requests(mut self, recent: Arc<RecentRequests>) -> Self {
        self.recent = recent;
        self
    }

    pub fn recent_requests(&self) -> Arc<RecentRequests> {
        self.recent.clone()
    }

    /// Cap on buffered request bodies, in bytes.
    pub fn with_max_body(mut self, max_body: usize) -> Self {
        self.max_body = max_body;
        self
    }

    /// Entry point for the axum server: buffers the body and dispatches.
    pub async fn handle_request(&self, req: Request<AxumBody>) -> GatewayResponse {
        let (parts, body) = req.into_parts();
        let body = match Limited::new(body, self.max_body).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                let response = if e.downcast_ref::<LengthLimitError>().is_some() {
                    tracing::warn!(limit = self.max_body, "Request body too large");
                    error_json(StatusCode::PAYLOAD_TOO_LARGE, "payload too large")
                } else {
                    tracing::warn!("Failed to read request body: {}", e);
                    error_json(StatusCode::BAD_REQUEST, "invalid body")
                };
                let info = RequestInfo::capture(&parts.method, &parts.uri, &parts.headers);
                return self.finalize(info, response).await;
            }
        };
        self.dispatch(Request::from_parts(parts, body)).await
    }

    pub async fn dispatch(&self, mut req: GatewayRequest) -> GatewayResponse {
        let info = RequestInfo::capture(req.method(), req.uri(), req.headers());
        let span = create_request_span(info.method.as_str(), &info.path);
        let response = match normalize_request_path(&mut req) {
            Ok(()) => self.run_pipeline(req).instrument(span).await,
            Err(e) => {
                tracing::warn!("Rejecting request with unusable path: {}", e);
                error_json(StatusCode::BAD_REQUEST, "invalid path")
            }
        };
        self.finalize(info, response).await
    }

    async fn run_pipeline(&self, req: GatewayRequest) -> GatewayResponse {
        match (req.method(), req.uri().path()) {
            (&Method::GET, "/admin/recent") => {
                return json(StatusCode::OK, &self.recent.snapshot().await);
            }
            (&Method::POST, "/admin/routes/reload") => {
                self.fallback.reload_routes().await;
                return empty(StatusCode::NO_CONTENT);
            }
            _ => {}
        }

        let mut req = req;
        for plugin in &self.plugins {
            req = match plugin.prepare(req).await {
                Ok(req) => req,
                Err(err) => {
                    if let PluginError::Internal(detail) = &err {
                        tracing::error!(plugin = plugin.name(), "Plugin prepare failed: {}", detail);
                    }
                    return err.into_response();
                }
            };
        }

        if let Some(orchestrator) = &self.orchestrator {
            match orchestrator.decide(&req).await {
                Decision::Allow => {}
                Decision::Deny { reason, .. } => {
                    return error_json(StatusCode::FORBIDDEN, &reason);
                }
                Decision::Escalate { reason, .. } => {
                    return json(
                        StatusCode::ACCEPTED,
                        &serde_json::json!({ "decision": "escalate", "reason": reason }),
                    );
                }
            }
        }

        if req.method() == Method::OPTIONS {
            return preflight(req.headers());
        }

        let response = self.route(&req).await;
        self.respond_chain(response, &req).await
    }

    async fn route(&self, req: &GatewayRequest) -> GatewayResponse {
        for plugin in &self.plugins {
            if let Some(response) = plugin.route(req).await {
                tracing::debug!(plugin = plugin.name(), "Request answered by plugin");
                return response;
            }
        }

        self.fallback.handle(req).await
    }

    async fn respond_chain(
        &self,
        mut response: GatewayResponse,
        req: &GatewayRequest,
    ) -> GatewayResponse {
        for plugin in self.plugins.iter().rev() {
            response = match plugin.respond(response, req).await {
                Ok(response) => response,
                Err(err) => {
                    tracing::error!(plugin = plugin.name(), "Plugin respond failed: {}", err);
                    return err.into_response();
                }
            };
        }
        response
    }

    async fn finalize(&self, info: RequestInfo, mut response: GatewayResponse) -> GatewayResponse {
        let origin = info
            .origin
            .clone()
            .unwrap_or_else(|| HeaderValue::from_static("*"));
        response
            .headers_mut()
            .entry(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .or_insert(origin);

        let status = response.status().as_u16();
        let duration_ms = info.timer.elapsed_ms();
        self.metrics
            .record_request(info.method.as_str(), status)
            .await;

        tracing::info!(
            target: "gatehouse::access",
            evt = "http_access",
            method = %info.method,
            path = %info.path,
            status,
            duration_ms,
            "request completed"
        );

        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .or(info.request_id.as_ref())
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        self.recent
            .append(RecentRequest {
                method: info.method.to_string(),
                path: info.path,
                status,
                duration_ms,
                timestamp: chrono::Utc::now().to_rfc3339(),
                request_id,
            })
            .await;

        response
    }
}

/// Rewrite the request path to its canonical form so plugins, RoleGuard, the
/// built-in endpoints and the proxy all match against the same string.
fn normalize_request_path(req: &mut GatewayRequest) -> Result<(), http::Error> {
    let normalized = normalize_path(req.uri().path());
    if normalized == req.uri().path() {
        return Ok(());
    }
    let target = match req.uri().query() {
        Some(query) => format!("{normalized}?{query}"),
        None => normalized,
    };
    let mut parts = req.uri().clone().into_parts();
    parts.path_and_query = Some(target.parse::<PathAndQuery>()?);
    *req.uri_mut() = Uri::from_parts(parts)?;
    Ok(())
}

/// Permissive CORS preflight answer.
fn preflight(headers: &HeaderMap) -> GatewayResponse {
    let mut response = empty(StatusCode::NO_CONTENT);
    let out = response.headers_mut();
    out.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        headers
            .get(header::ORIGIN)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("*")),
    );
    out.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(PREFLIGHT_METHODS),
    );
    out.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        headers
            .get(header::ACCESS_CONTROL_REQUEST_HEADERS)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static(PREFLIGHT_HEADERS)),
    );
    out.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static(PREFLIGHT_MAX_AGE),
    );
    response
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use bytes::Bytes;
    use http_body_util::BodyExt;
    use tokio::sync::Mutex;

    use super::*;
    use crate::{
        adapters::{
            admin_gate::AdminGate, document_store::MemoryDocumentStore, plugins::LoggingPlugin,
            token_validator::HmacTokenValidator,
        },
        core::{
            CircuitBreaker, ReverseProxy, RouteTable,
            decision::DestructiveGuardian,
            plugin::PluginResult,
        },
        metrics::REQUESTS_TOTAL,
        ports::http_client::{HttpClient, HttpClientError, HttpClientResult},
    };

    struct Unreachable;

    #[async_trait]
    impl HttpClient for Unreachable {
        async fn send_request(
            &self,
            _req: Request<AxumBody>,
        ) -> HttpClientResult<http::Response<AxumBody>> {
            Err(HttpClientError::ConnectionError("unreachable".to_string()))
        }
    }

    /// Records the order its hooks ran in.
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        answers: Option<&'static str>,
        reject: bool,
    }

    #[async_trait]
    impl GatewayPlugin for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn prepare(&self, req: GatewayRequest) -> PluginResult<GatewayRequest> {
            self.log.lock().await.push(format!("prepare:{}", self.name));
            if self.reject {
                return Err(PluginError::TooManyRequests);
            }
            Ok(req)
        }

        async fn respond(
            &self,
            response: GatewayResponse,
            _req: &GatewayRequest,
        ) -> PluginResult<GatewayResponse> {
            self.log.lock().await.push(format!("respond:{}", self.name));
            Ok(response)
        }

        async fn route(&self, req: &GatewayRequest) -> Option<GatewayResponse> {
            match self.answers {
                Some(path) if req.uri().path() == path => Some(empty(StatusCode::IM_A_TEAPOT)),
                _ => None,
            }
        }
    }

    fn recorder(
        name: &'static str,
        log: &Arc<Mutex<Vec<String>>>,
        answers: Option<&'static str>,
    ) -> Arc<Recorder> {
        Arc::new(Recorder {
            name,
            log: log.clone(),
            answers,
            reject: false,
        })
    }

    fn create_test_handler(validator: Arc<HmacTokenValidator>) -> (HttpHandler, Arc<GatewayMetrics>) {
        let routes = Arc::new(RouteTable::new(None));
        let proxy = Arc::new(ReverseProxy::new(
            routes.clone(),
            Arc::new(CircuitBreaker::default()),
            Arc::new(Unreachable),
        ));
        let metrics = Arc::new(GatewayMetrics::new());
        let gate = AdminGate::new(validator, metrics.clone());
        let fallback = Arc::new(FallbackHandler::new(
            routes,
            proxy,
            metrics.clone(),
            gate,
            Arc::new(MemoryDocumentStore::new()),
        ));
        (HttpHandler::new(fallback, metrics.clone()), metrics)
    }

    fn request(method: Method, path: &str) -> GatewayRequest {
        Request::builder()
            .method(method)
            .uri(path)
            .body(Bytes::new())
            .unwrap()
    }

    #[tokio::test]
    async fn test_plugin_order_and_reverse_respond() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (handler, _) = create_test_handler(Arc::new(HmacTokenValidator::new("k")));
        let handler = handler
            .with_plugin(recorder("a", &log, None))
            .with_plugin(recorder("b", &log, Some("/teapot")));

        let response = handler.dispatch(request(Method::GET, "/teapot")).await;
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(
            *log.lock().await,
            vec!["prepare:a", "prepare:b", "respond:b", "respond:a"]
        );
    }

    #[tokio::test]
    async fn test_prepare_rejection_short_circuits() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (handler, metrics) = create_test_handler(Arc::new(HmacTokenValidator::new("k")));
        let handler = handler
            .with_plugin(Arc::new(Recorder {
                name: "limiter",
                log: log.clone(),
                answers: None,
                reject: true,
            }))
            .with_plugin(recorder("later", &log, None));

        let response = handler.dispatch(request(Method::GET, "/live")).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "*"
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"too many requests");
        assert_eq!(*log.lock().await, vec!["prepare:limiter"]);
        assert_eq!(metrics.get("requests_status_429").await, 1);
    }

    #[tokio::test]
    async fn test_preflight_skips_routers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (handler, _) = create_test_handler(Arc::new(HmacTokenValidator::new("k")));
        let handler = handler.with_plugin(recorder("a", &log, Some("/routes")));

        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("/routes")
            .header(header::ORIGIN, "https://app.example")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "X-Custom")
            .body(Bytes::new())
            .unwrap();
        let response = handler.dispatch(req).await;

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let headers = response.headers();
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "https://app.example"
        );
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_METHODS).unwrap(),
            PREFLIGHT_METHODS
        );
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_HEADERS).unwrap(),
            "X-Custom"
        );
        assert_eq!(headers.get(header::ACCESS_CONTROL_MAX_AGE).unwrap(), "600");
        assert_eq!(*log.lock().await, vec!["prepare:a"]);
    }

    #[tokio::test]
    async fn test_decision_overlay() {
        let (handler, _) = create_test_handler(Arc::new(HmacTokenValidator::new("k")));
        let guardian = DestructiveGuardian::new(["/zones".to_string()], ["ops-token".to_string()]);
        let handler = handler
            .with_orchestrator(Arc::new(DecisionOrchestrator::new().with_evaluator(Arc::new(guardian))));

        let escalated = handler.dispatch(request(Method::DELETE, "/zones/abc")).await;
        assert_eq!(escalated.status(), StatusCode::ACCEPTED);
        let body = escalated.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["decision"], "escalate");

        let denied = Request::builder()
            .method(Method::DELETE)
            .uri("/zones/abc")
            .header("x-service-token", "stranger")
            .body(Bytes::new())
            .unwrap();
        let denied = handler.dispatch(denied).await;
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);
        let body = denied.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "guardian");
    }

    #[tokio::test]
    async fn test_metrics_requires_admin() {
        let validator = Arc::new(HmacTokenValidator::new("k"));
        let (handler, _) = create_test_handler(validator.clone());

        for path in ["/metrics", "/metrics/", "//metrics", "/live/../metrics"] {
            let anonymous = handler.dispatch(request(Method::GET, path)).await;
            assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED, "{path}");
        }

        let user = validator.sign("joe", Some("user"), &[], None).unwrap();
        let req = Request::builder()
            .uri("/metrics")
            .header(header::AUTHORIZATION, format!("Bearer {user}"))
            .body(Bytes::new())
            .unwrap();
        assert_eq!(handler.dispatch(req).await.status(), StatusCode::FORBIDDEN);

        let admin = validator.sign("root", Some("admin"), &[], None).unwrap();
        let req = Request::builder()
            .uri("/metrics")
            .header(header::AUTHORIZATION, format!("Bearer {admin}"))
            .body(Bytes::new())
            .unwrap();
        let response = handler.dispatch(req).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["roleguard_unauthorized_total"], 4);
        assert_eq!(value["roleguard_forbidden_total"], 1);
    }

    #[tokio::test]
    async fn test_recent_requests_and_counters() {
        let (handler, metrics) = create_test_handler(Arc::new(HmacTokenValidator::new("k")));
        let handler = handler.with_plugin(Arc::new(LoggingPlugin));

        let live = handler.dispatch(request(Method::GET, "/live?check=1")).await;
        assert_eq!(live.status(), StatusCode::OK);
        let id = live.headers().get(REQUEST_ID_HEADER).unwrap().clone();
        let missing = handler.dispatch(request(Method::GET, "/nowhere")).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let recent = handler.dispatch(request(Method::GET, "/admin/recent")).await;
        let body = recent.into_body().collect().await.unwrap().to_bytes();
        let items: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["path"], "/live?check=1");
        assert_eq!(items[0]["requestId"], id.to_str().unwrap());
        assert_eq!(items[1]["status"], 404);

        assert_eq!(metrics.get(REQUESTS_TOTAL).await, 3);
        assert_eq!(metrics.get("requests_method_GET").await, 3);
    }

    #[tokio::test]
    async fn test_handle_request_buffers_body() {
        let (handler, _) = create_test_handler(Arc::new(HmacTokenValidator::new("k")));
        let req = Request::builder()
            .method(Method::POST)
            .uri("/routes")
            .body(AxumBody::from(
                r#"{"id":"r1","path":"/svc","target":"http://upstream:9000"}"#,
            ))
            .unwrap();
        let response = handler.handle_request(req).await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let reload = handler
            .dispatch(request(Method::POST, "/admin/routes/reload"))
            .await;
        assert_eq!(reload.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let (handler, metrics) = create_test_handler(Arc::new(HmacTokenValidator::new("k")));
        let handler = handler.with_max_body(16);
        let req = Request::builder()
            .method(Method::POST)
            .uri("/routes")
            .body(AxumBody::from(
                r#"{"id":"r1","path":"/svc","target":"http://upstream:9000"}"#,
            ))
            .unwrap();
        let response = handler.handle_request(req).await;

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"], "payload too large");
        assert_eq!(metrics.get("requests_status_413").await, 1);

        let routes = handler.dispatch(request(Method::GET, "/routes")).await;
        let body = routes.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"[]");
    }

    #[tokio::test]
    async fn test_normalized_path_reaches_builtins() {
        let (handler, _) = create_test_handler(Arc::new(HmacTokenValidator::new("k")));
        for path in ["//live", "/live/", "/ready/../live", "/./live?x=1"] {
            let response = handler.dispatch(request(Method::GET, path)).await;
            assert_eq!(response.status(), StatusCode::OK, "{path}");
        }
    }
}
