//! Built-in endpoints answered after the plugin routers had their chance:
//! health checks, metrics, RoleGuard and route administration, zone CRUD and the
//! agent well-known documents. Anything unmatched goes to the reverse proxy
//! and finally 404.
use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use http::{Method, StatusCode};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    adapters::admin_gate::AdminGate,
    core::{
        GatewayRequest,
        proxy::ReverseProxy,
        response::{GatewayResponse, empty, error_json, json, raw_json},
        role_guard::RoleGuardStore,
        route_table::{HttpVerb, Route, RouteTable, RouteTableError},
    },
    metrics::{GatewayMetrics, ROLEGUARD_ACTIVE_RULES, ROLEGUARD_RELOADS_TOTAL},
    ports::{
        document_store::DocumentStore,
        zone_manager::{RecordInput, ZoneError, ZoneManager},
    },
};

pub const DESCRIPTOR_COLLECTION: &str = "agent-descriptors";
pub const FACTS_COLLECTION: &str = "agent-facts";

/// Which agent the well-known documents describe.
#[derive(Debug, Clone, Default)]
pub struct AgentSettings {
    pub agent_id: Option<String>,
    pub corpus: String,
}

/// Route body for create and update. The id may be omitted on update,
/// where the path segment supplies it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteInput {
    #[serde(default)]
    id: Option<String>,
    path: String,
    target: String,
    #[serde(default)]
    methods: Vec<HttpVerb>,
    #[serde(default)]
    rate_limit: Option<u32>,
    #[serde(default)]
    proxy_enabled: Option<bool>,
}

impl RouteInput {
    fn into_route(self, id: String) -> Route {
        Route {
            id,
            path: self.path,
            target: self.target,
            methods: self.methods,
            rate_limit: self.rate_limit,
            proxy_enabled: self.proxy_enabled,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ZoneCreateRequest {
    name: String,
}

pub struct FallbackHandler {
    routes: Arc<RouteTable>,
    proxy: Arc<ReverseProxy>,
    metrics: Arc<GatewayMetrics>,
    admin_gate: AdminGate,
    documents: Arc<dyn DocumentStore>,
    agent: AgentSettings,
    role_guard: Option<Arc<RoleGuardStore>>,
    zones: Option<Arc<dyn ZoneManager>>,
    openapi_path: Option<PathBuf>,
}

impl FallbackHandler {
    pub fn new(
        routes: Arc<RouteTable>,
        proxy: Arc<ReverseProxy>,
        metrics: Arc<GatewayMetrics>,
        admin_gate: AdminGate,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            routes,
            proxy,
            metrics,
            admin_gate,
            documents,
            agent: AgentSettings {
                agent_id: None,
                corpus: "agents".to_string(),
            },
            role_guard: None,
            zones: None,
            openapi_path: None,
        }
    }

    pub fn with_agent(mut self, agent: AgentSettings) -> Self {
        self.agent = agent;
        self
    }

    pub fn with_role_guard(mut self, store: Arc<RoleGuardStore>) -> Self {
        self.role_guard = Some(store);
        self
    }

    pub fn with_zone_manager(mut self, zones: Arc<dyn ZoneManager>) -> Self {
        self.zones = Some(zones);
        self
    }

    pub fn with_openapi_path(mut self, path: PathBuf) -> Self {
        self.openapi_path = Some(path);
        self
    }

    pub async fn handle(&self, req: &GatewayRequest) -> GatewayResponse {
        let method = req.method().clone();
        let path = req.uri().path();

        if method == Method::GET && path == "/.well-known/agent-descriptor" {
            return self.agent_descriptor().await;
        }
        if method == Method::GET && path == "/.well-known/agent-facts" {
            return self.agent_facts().await;
        }
        if path == "/openapi.yaml" {
            if let Some(response) = self.openapi().await {
                return response;
            }
        }

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match (&method, segments.as_slice()) {
            (&Method::GET, ["live"]) => json(StatusCode::OK, &serde_json::json!({ "status": "live" })),
            (&Method::GET, ["ready"]) => self.readiness().await,
            (&Method::GET, ["metrics"]) => self.metrics_snapshot(req).await,
            (&Method::GET, ["roleguard"]) => self.list_role_guard(req).await,
            (&Method::POST, ["roleguard", "reload"]) => self.reload_role_guard(req).await,
            (&Method::POST, ["routes", "reload"]) => {
                self.reload_routes().await;
                empty(StatusCode::NO_CONTENT)
            }
            (&Method::GET, ["routes"]) => json(StatusCode::OK, &self.routes.list().await),
            (&Method::POST, ["routes"]) => self.create_route(req).await,
            (&Method::PUT, ["routes", id]) => self.update_route(&decode_segment(id), req).await,
            (&Method::DELETE, ["routes", id]) => self.delete_route(&decode_segment(id)).await,
            (&Method::GET, ["zones"]) => self.list_zones().await,
            (&Method::POST, ["zones"]) => self.create_zone(req).await,
            (&Method::DELETE, ["zones", zone]) => self.delete_zone(zone).await,
            (&Method::GET, ["zones", zone, "records"]) => self.list_records(zone).await,
            (&Method::POST, ["zones", zone, "records"]) => self.create_record(zone, req).await,
            (&Method::PUT, ["zones", zone, "records", record]) => {
                self.update_record(zone, record, req).await
            }
            (&Method::DELETE, ["zones", zone, "records", record]) => {
                self.delete_record(zone, record).await
            }
            _ => match self.proxy.try_proxy(req).await {
                Some(response) => response,
                None => empty(StatusCode::NOT_FOUND),
            },
        }
    }

    /// Reload the route table; failures are logged and the table kept.
    pub async fn reload_routes(&self) {
        match self.routes.reload().await {
            Ok(report) if report.skipped > 0 => tracing::warn!(
                skipped = report.skipped,
                "Reloaded {} routes, skipped {} persisted entries",
                report.loaded,
                report.skipped
            ),
            Ok(report) => tracing::info!("Reloaded {} routes", report.loaded),
            Err(e) => tracing::warn!("Route reload failed, keeping current table: {}", e),
        }
    }

    async fn readiness(&self) -> GatewayResponse {
        let rules = self
            .role_guard
            .as_ref()
            .map(|store| store.rules().len())
            .unwrap_or(0);
        json(
            StatusCode::OK,
            &serde_json::json!({
                "status": "ready",
                "routes": self.routes.len().await,
                "roleguardRules": rules,
            }),
        )
    }

    async fn metrics_snapshot(&self, req: &GatewayRequest) -> GatewayResponse {
        if let Some(denied) = self.admin_gate.check(req.headers()).await {
            return denied;
        }
        let mut snapshot: BTreeMap<String, u64> = self.metrics.snapshot().await;
        snapshot.extend(self.proxy.breaker().metrics().await);
        if let Some(store) = &self.role_guard {
            snapshot.insert(ROLEGUARD_ACTIVE_RULES.to_string(), store.rules().len() as u64);
        }
        json(StatusCode::OK, &snapshot)
    }

    async fn list_role_guard(&self, req: &GatewayRequest) -> GatewayResponse {
        let Some(store) = &self.role_guard else {
            return empty(StatusCode::NOT_FOUND);
        };
        if let Some(denied) = self.admin_gate.check(req.headers()).await {
            return denied;
        }
        json(StatusCode::OK, store.rules().as_ref())
    }

    async fn reload_role_guard(&self, req: &GatewayRequest) -> GatewayResponse {
        let Some(store) = &self.role_guard else {
            return empty(StatusCode::NOT_FOUND);
        };
        if let Some(denied) = self.admin_gate.check(req.headers()).await {
            return denied;
        }
        if store.reload().await {
            self.metrics.increment(ROLEGUARD_RELOADS_TOTAL).await;
            self.metrics
                .set(ROLEGUARD_ACTIVE_RULES, store.rules().len() as u64)
                .await;
            empty(StatusCode::NO_CONTENT)
        } else {
            empty(StatusCode::NOT_MODIFIED)
        }
    }

    async fn create_route(&self, req: &GatewayRequest) -> GatewayResponse {
        let Ok(input) = serde_json::from_slice::<RouteInput>(req.body()) else {
            return error_json(StatusCode::BAD_REQUEST, "invalid route");
        };
        let Some(id) = input.id.clone().filter(|id| !id.trim().is_empty()) else {
            return error_json(StatusCode::BAD_REQUEST, "route id is required");
        };
        match self.routes.create(input.into_route(id)).await {
            Ok(route) => json(StatusCode::CREATED, &route),
            Err(e) => route_error(e),
        }
    }

    async fn update_route(&self, id: &str, req: &GatewayRequest) -> GatewayResponse {
        if self.routes.get(id).await.is_none() {
            return error_json(StatusCode::NOT_FOUND, "not found");
        }
        let Ok(input) = serde_json::from_slice::<RouteInput>(req.body()) else {
            return error_json(StatusCode::BAD_REQUEST, "invalid route");
        };
        match self.routes.update(id, input.into_route(id.to_string())).await {
            Ok(route) => {
                self.proxy.forget_route(id, Some(&route)).await;
                json(StatusCode::OK, &route)
            }
            Err(e) => route_error(e),
        }
    }

    async fn delete_route(&self, id: &str) -> GatewayResponse {
        match self.routes.delete(id).await {
            Ok(()) => {
                self.proxy.forget_route(id, None).await;
                empty(StatusCode::NO_CONTENT)
            }
            Err(e) => route_error(e),
        }
    }

    fn zone_manager(&self) -> Result<&Arc<dyn ZoneManager>, GatewayResponse> {
        self.zones
            .as_ref()
            .ok_or_else(|| error_json(StatusCode::INTERNAL_SERVER_ERROR, "zone manager unavailable"))
    }

    async fn list_zones(&self) -> GatewayResponse {
        let manager = match self.zone_manager() {
            Ok(manager) => manager,
            Err(response) => return response,
        };
        json(
            StatusCode::OK,
            &serde_json::json!({ "zones": manager.list_zones().await }),
        )
    }

    async fn create_zone(&self, req: &GatewayRequest) -> GatewayResponse {
        let manager = match self.zone_manager() {
            Ok(manager) => manager,
            Err(response) => return response,
        };
        let Ok(body) = serde_json::from_slice::<ZoneCreateRequest>(req.body()) else {
            return error_json(StatusCode::BAD_REQUEST, "invalid zone data");
        };
        match manager.create_zone(&body.name).await {
            Ok(zone) => json(StatusCode::CREATED, &zone),
            Err(ZoneError::Conflict(_)) => error_json(StatusCode::CONFLICT, "zone exists"),
            Err(_) => error_json(StatusCode::BAD_REQUEST, "invalid zone data"),
        }
    }

    async fn delete_zone(&self, zone: &str) -> GatewayResponse {
        let manager = match self.zone_manager() {
            Ok(manager) => manager,
            Err(response) => return response,
        };
        let Ok(zone_id) = Uuid::parse_str(zone) else {
            return error_json(StatusCode::NOT_FOUND, "zone not found");
        };
        match manager.delete_zone(zone_id).await {
            Ok(()) => empty(StatusCode::NO_CONTENT),
            Err(e) => zone_error(e),
        }
    }

    async fn list_records(&self, zone: &str) -> GatewayResponse {
        let manager = match self.zone_manager() {
            Ok(manager) => manager,
            Err(response) => return response,
        };
        let Ok(zone_id) = Uuid::parse_str(zone) else {
            return error_json(StatusCode::NOT_FOUND, "zone not found");
        };
        match manager.list_records(zone_id).await {
            Ok(records) => json(StatusCode::OK, &serde_json::json!({ "records": records })),
            Err(e) => zone_error(e),
        }
    }

    async fn create_record(&self, zone: &str, req: &GatewayRequest) -> GatewayResponse {
        let manager = match self.zone_manager() {
            Ok(manager) => manager,
            Err(response) => return response,
        };
        let Ok(zone_id) = Uuid::parse_str(zone) else {
            return error_json(StatusCode::NOT_FOUND, "zone not found");
        };
        let Ok(input) = serde_json::from_slice::<RecordInput>(req.body()) else {
            return error_json(StatusCode::BAD_REQUEST, "invalid record data");
        };
        match manager.create_record(zone_id, input).await {
            Ok(record) => json(StatusCode::CREATED, &record),
            Err(e) => zone_error(e),
        }
    }

    async fn update_record(&self, zone: &str, record: &str, req: &GatewayRequest) -> GatewayResponse {
        let manager = match self.zone_manager() {
            Ok(manager) => manager,
            Err(response) => return response,
        };
        let (Ok(zone_id), Ok(record_id)) = (Uuid::parse_str(zone), Uuid::parse_str(record)) else {
            return error_json(StatusCode::NOT_FOUND, "record not found");
        };
        let Ok(input) = serde_json::from_slice::<RecordInput>(req.body()) else {
            return error_json(StatusCode::BAD_REQUEST, "invalid record data");
        };
        match manager.update_record(zone_id, record_id, input).await {
            Ok(record) => json(StatusCode::OK, &record),
            Err(e) => zone_error(e),
        }
    }

    async fn delete_record(&self, zone: &str, record: &str) -> GatewayResponse {
        let manager = match self.zone_manager() {
            Ok(manager) => manager,
            Err(response) => return response,
        };
        let (Ok(zone_id), Ok(record_id)) = (Uuid::parse_str(zone), Uuid::parse_str(record)) else {
            return error_json(StatusCode::NOT_FOUND, "record not found");
        };
        match manager.delete_record(zone_id, record_id).await {
            Ok(()) => empty(StatusCode::NO_CONTENT),
            Err(e) => zone_error(e),
        }
    }

    async fn agent_descriptor(&self) -> GatewayResponse {
        let Some(agent_id) = &self.agent.agent_id else {
            return error_json(StatusCode::NOT_FOUND, "agent id not configured");
        };
        let key = format!("agent:{agent_id}");
        if let Some(doc) = self.lookup(DESCRIPTOR_COLLECTION, &key).await {
            return raw_json(StatusCode::OK, doc);
        }
        json(
            StatusCode::NOT_FOUND,
            &serde_json::json!({
                "error": "descriptor not found",
                "agentId": agent_id,
                "corpus": self.agent.corpus,
            }),
        )
    }

    async fn agent_facts(&self) -> GatewayResponse {
        let Some(agent_id) = &self.agent.agent_id else {
            return error_json(StatusCode::NOT_FOUND, "agent id not configured");
        };
        let key = format!("facts:agent:{}", agent_id.replace('/', "|"));
        let legacy_key = format!("facts:agent:{agent_id}");
        for candidate in [&key, &legacy_key] {
            if let Some(doc) = self.lookup(FACTS_COLLECTION, candidate).await {
                return raw_json(StatusCode::OK, doc);
            }
        }
        json(
            StatusCode::NOT_FOUND,
            &serde_json::json!({
                "error": "facts not found",
                "agentId": agent_id,
                "factsId": key,
                "legacyFactsId": legacy_key,
                "corpus": self.agent.corpus,
            }),
        )
    }

    async fn lookup(&self, collection: &str, id: &str) -> Option<bytes::Bytes> {
        match self.documents.get(&self.agent.corpus, collection, id).await {
            Ok(doc) => doc,
            Err(e) => {
                tracing::debug!(collection, id, "Document lookup failed: {}", e);
                None
            }
        }
    }

    async fn openapi(&self) -> Option<GatewayResponse> {
        let path = self.openapi_path.as_ref()?;
        match tokio::fs::read(path).await {
            Ok(data) => {
                let mut response = raw_json(StatusCode::OK, data);
                response.headers_mut().insert(
                    http::header::CONTENT_TYPE,
                    http::HeaderValue::from_static("application/yaml"),
                );
                Some(response)
            }
            Err(e) => {
                tracing::warn!("Failed to read OpenAPI document {}: {}", path.display(), e);
                None
            }
        }
    }
}

fn decode_segment(segment: &str) -> String {
    urlencoding::decode(segment)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| segment.to_string())
}

fn route_error(error: RouteTableError) -> GatewayResponse {
    match error {
        RouteTableError::Conflict(_) => error_json(StatusCode::CONFLICT, "exists"),
        RouteTableError::NotFound(_) => error_json(StatusCode::NOT_FOUND, "not found"),
        RouteTableError::Invalid(_) => error_json(StatusCode::BAD_REQUEST, "invalid route"),
        other => {
            tracing::error!("Route operation failed: {}", other);
            error_json(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

fn zone_error(error: ZoneError) -> GatewayResponse {
    match error {
        ZoneError::ZoneNotFound => error_json(StatusCode::NOT_FOUND, "zone not found"),
        ZoneError::RecordNotFound => error_json(StatusCode::NOT_FOUND, "record not found"),
        ZoneError::Conflict(_) => error_json(StatusCode::CONFLICT, "zone exists"),
        ZoneError::Invalid(_) => error_json(StatusCode::BAD_REQUEST, "invalid record data"),
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::Request;
    use http_body_util::BodyExt;

    use super::*;
    use crate::{
        adapters::{
            document_store::MemoryDocumentStore, token_validator::RejectAllValidator,
            zone_manager::InMemoryZoneManager,
        },
        core::circuit_breaker::CircuitBreaker,
        ports::http_client::{HttpClient, HttpClientError, HttpClientResult},
    };

    struct Unreachable;

    #[async_trait::async_trait]
    impl HttpClient for Unreachable {
        async fn send_request(
            &self,
            _req: Request<axum::body::Body>,
        ) -> HttpClientResult<http::Response<axum::body::Body>> {
            Err(HttpClientError::ConnectionError("unreachable".to_string()))
        }
    }

    fn handler(documents: Arc<MemoryDocumentStore>) -> FallbackHandler {
        let routes = Arc::new(RouteTable::new(None));
        let proxy = Arc::new(ReverseProxy::new(
            routes.clone(),
            Arc::new(CircuitBreaker::default()),
            Arc::new(Unreachable),
        ));
        let metrics = Arc::new(GatewayMetrics::new());
        let gate = AdminGate::new(Arc::new(RejectAllValidator), metrics.clone());
        FallbackHandler::new(routes, proxy, metrics, gate, documents)
    }

    fn request(method: Method, path: &str, body: &str) -> GatewayRequest {
        Request::builder()
            .method(method)
            .uri(path)
            .body(Bytes::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: GatewayResponse) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_route_crud_statuses() {
        let h = handler(Arc::new(MemoryDocumentStore::new()));
        let body = r#"{"id":"r1","path":"/svc","target":"http://upstream:9000"}"#;

        let created = h.handle(&request(Method::POST, "/routes", body)).await;
        assert_eq!(created.status(), StatusCode::CREATED);
        let again = h.handle(&request(Method::POST, "/routes", body)).await;
        assert_eq!(again.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(again).await["error"], "exists");

        let bad_verb = r#"{"id":"r2","path":"/x","target":"http://u","methods":["TRACE"]}"#;
        assert_eq!(
            h.handle(&request(Method::POST, "/routes", bad_verb)).await.status(),
            StatusCode::BAD_REQUEST
        );

        let update = r#"{"path":"/svc2","target":"http://upstream:9001"}"#;
        let updated = h.handle(&request(Method::PUT, "/routes/r1", update)).await;
        assert_eq!(updated.status(), StatusCode::OK);
        assert_eq!(body_json(updated).await["id"], "r1");
        assert_eq!(
            h.handle(&request(Method::PUT, "/routes/nope", update)).await.status(),
            StatusCode::NOT_FOUND
        );

        assert_eq!(
            h.handle(&request(Method::DELETE, "/routes/r1", "")).await.status(),
            StatusCode::NO_CONTENT
        );
        assert_eq!(
            h.handle(&request(Method::DELETE, "/routes/r1", "")).await.status(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_zones_unavailable_without_manager() {
        let h = handler(Arc::new(MemoryDocumentStore::new()));
        let response = h.handle(&request(Method::GET, "/zones", "")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["error"], "zone manager unavailable");
    }

    #[tokio::test]
    async fn test_zone_crud() {
        let h = handler(Arc::new(MemoryDocumentStore::new()))
            .with_zone_manager(Arc::new(InMemoryZoneManager::new()));

        let created = h
            .handle(&request(Method::POST, "/zones", r#"{"name":"example.com"}"#))
            .await;
        assert_eq!(created.status(), StatusCode::CREATED);
        let zone_id = body_json(created).await["id"].as_str().unwrap().to_string();

        let record = h
            .handle(&request(
                Method::POST,
                &format!("/zones/{zone_id}/records"),
                r#"{"name":"www","type":"A","value":"10.0.0.1"}"#,
            ))
            .await;
        assert_eq!(record.status(), StatusCode::CREATED);

        let listed = h
            .handle(&request(Method::GET, &format!("/zones/{zone_id}/records"), ""))
            .await;
        assert_eq!(body_json(listed).await["records"].as_array().unwrap().len(), 1);

        assert_eq!(
            h.handle(&request(Method::DELETE, "/zones/not-a-uuid", "")).await.status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            h.handle(&request(Method::DELETE, &format!("/zones/{zone_id}"), ""))
                .await
                .status(),
            StatusCode::NO_CONTENT
        );
    }

    #[tokio::test]
    async fn test_agent_facts_prefers_sanitized_key() {
        let documents = Arc::new(MemoryDocumentStore::new());
        documents
            .put("agents", FACTS_COLLECTION, "facts:agent:team/bot", Bytes::from_static(b"{\"legacy\":true}"))
            .await
            .unwrap();
        let h = handler(documents.clone()).with_agent(AgentSettings {
            agent_id: Some("team/bot".to_string()),
            corpus: "agents".to_string(),
        });

        let legacy = h
            .handle(&request(Method::GET, "/.well-known/agent-facts", ""))
            .await;
        assert_eq!(body_json(legacy).await["legacy"], true);

        documents
            .put("agents", FACTS_COLLECTION, "facts:agent:team|bot", Bytes::from_static(b"{\"legacy\":false}"))
            .await
            .unwrap();
        let sanitized = h
            .handle(&request(Method::GET, "/.well-known/agent-facts", ""))
            .await;
        assert_eq!(body_json(sanitized).await["legacy"], false);

        let missing = h
            .handle(&request(Method::GET, "/.well-known/agent-descriptor", ""))
            .await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(missing).await["error"], "descriptor not found");
    }

    #[tokio::test]
    async fn test_health_endpoints_and_unknown_path() {
        let h = handler(Arc::new(MemoryDocumentStore::new()));
        let live = h.handle(&request(Method::GET, "/live", "")).await;
        assert_eq!(body_json(live).await["status"], "live");

        let ready = body_json(h.handle(&request(Method::GET, "/ready", "")).await).await;
        assert_eq!(ready["routes"], 0);

        assert_eq!(
            h.handle(&request(Method::GET, "/roleguard", "")).await.status(),
            StatusCode::NOT_FOUND
        );
        for path in ["/metrics", "/metrics/", "//metrics"] {
            assert_eq!(
                h.handle(&request(Method::GET, path, "")).await.status(),
                StatusCode::UNAUTHORIZED,
                "{path}"
            );
        }
        assert_eq!(
            h.handle(&request(Method::GET, "/nowhere", "")).await.status(),
            StatusCode::NOT_FOUND
        );
    }
}
