//! Assembles the gateway from a [`GatewayConfig`].
use std::sync::Arc;

use axum::{Router, extract::Request, routing::any};
use eyre::{Result, WrapErr};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::{
    adapters::{
        AdminGate, AgentSettings, DiskDocumentStore, FallbackHandler, FileRouteStore,
        HmacTokenValidator, HttpHandler, InMemoryZoneManager, LoggingPlugin, MemoryDocumentStore,
        RejectAllValidator, RoleGuardPlugin,
    },
    config::GatewayConfig,
    core::{
        CircuitBreaker, DecisionOrchestrator, DestructiveGuardian, ReverseProxy, RoleGuardStore,
        RouteRateLimiter, RouteTable, role_guard,
    },
    metrics::{GatewayMetrics, ROLEGUARD_ACTIVE_RULES},
    ports::{
        document_store::DocumentStore, http_client::HttpClient, route_store::RouteStore,
        token_validator::TokenValidator,
    },
};

/// A wired gateway plus the handles the binary needs for reloads.
pub struct Gateway {
    pub handler: Arc<HttpHandler>,
    pub fallback: Arc<FallbackHandler>,
    pub routes: Arc<RouteTable>,
    pub role_guard: Option<Arc<RoleGuardStore>>,
    pub metrics: Arc<GatewayMetrics>,
}

impl Gateway {
    /// Build every component. `http_client` is injected so tests can observe
    /// upstream traffic.
    pub async fn build(config: &GatewayConfig, http_client: Arc<dyn HttpClient>) -> Result<Self> {
        let metrics = Arc::new(GatewayMetrics::new());

        let store: Arc<dyn RouteStore> = Arc::new(FileRouteStore::new(&config.routes_path));
        let routes = Arc::new(RouteTable::open(Some(store)).await);

        let validator: Arc<dyn TokenValidator> = match &config.auth.jwt_secret {
            Some(secret) => Arc::new(HmacTokenValidator::new(secret.as_bytes())),
            None => {
                tracing::warn!("No auth.jwt_secret configured; all bearer tokens will be rejected");
                Arc::new(RejectAllValidator)
            }
        };

        let breaker = Arc::new(CircuitBreaker::new(
            config.breaker.failure_threshold,
            config
                .breaker
                .cooldown()
                .wrap_err("Invalid breaker.cooldown")?,
        ));
        let proxy = Arc::new(
            ReverseProxy::new(routes.clone(), breaker, http_client)
                .with_rate_limiter(Arc::new(RouteRateLimiter::new()), config.default_rate_limit)
                .with_identity(validator.clone()),
        );

        let documents: Arc<dyn DocumentStore> = match &config.store_dir {
            Some(dir) => Arc::new(DiskDocumentStore::new(dir)),
            None => Arc::new(MemoryDocumentStore::new()),
        };

        let admin_gate = AdminGate::new(validator.clone(), metrics.clone());
        let mut fallback = FallbackHandler::new(
            routes.clone(),
            proxy,
            metrics.clone(),
            admin_gate,
            documents,
        )
        .with_agent(AgentSettings {
            agent_id: config.agent.agent_id.clone(),
            corpus: config.agent.corpus.clone(),
        })
        .with_zone_manager(Arc::new(InMemoryZoneManager::new()));
        if let Some(path) = &config.openapi_path {
            fallback = fallback.with_openapi_path(path.clone());
        }

        let role_guard = match &config.roleguard_path {
            Some(path) => {
                let store = Arc::new(RoleGuardStore::from_path(path).await);
                metrics
                    .set(ROLEGUARD_ACTIVE_RULES, store.rules().len() as u64)
                    .await;
                fallback = fallback.with_role_guard(store.clone());
                Some(store)
            }
            None => None,
        };
        let fallback = Arc::new(fallback);

        let mut handler = HttpHandler::new(fallback.clone(), metrics.clone())
            .with_max_body(config.proxy.max_body)
            .with_plugin(Arc::new(LoggingPlugin));
        if let Some(store) = &role_guard {
            handler = handler.with_plugin(Arc::new(RoleGuardPlugin::new(
                store.clone(),
                validator,
                metrics.clone(),
            )));
        }
        if !config.guardian.sensitive_prefixes.is_empty() {
            let guardian = DestructiveGuardian::new(
                config.guardian.sensitive_prefixes.iter().cloned(),
                config.guardian.privileged_tokens.iter().cloned(),
            );
            handler = handler.with_orchestrator(Arc::new(
                DecisionOrchestrator::new().with_evaluator(Arc::new(guardian)),
            ));
        }

        Ok(Self {
            handler: Arc::new(handler),
            fallback,
            routes,
            role_guard,
            metrics,
        })
    }

    /// Start the RoleGuard poller when a rules file is configured.
    pub fn spawn_role_guard_reloader(
        &self,
        config: &GatewayConfig,
        cancel: CancellationToken,
    ) -> Result<Option<JoinHandle<()>>> {
        let Some(store) = &self.role_guard else {
            return Ok(None);
        };
        let interval = config
            .roleguard_poll_interval()
            .wrap_err("Invalid roleguard_poll_interval")?;
        Ok(Some(role_guard::spawn_reloader(
            store.clone(),
            interval,
            cancel,
            self.metrics.clone(),
        )))
    }

    /// Every path, including `/`, goes through the dispatcher.
    pub fn router(&self) -> Router {
        let dispatch = |handler: Arc<HttpHandler>| {
            any(move |req: Request| {
                let handler = handler.clone();
                async move { handler.handle_request(req).await }
            })
        };

        Router::new()
            .route("/", dispatch(self.handler.clone()))
            .route("/{*path}", dispatch(self.handler.clone()))
            .layer(TraceLayer::new_for_http())
    }
}
