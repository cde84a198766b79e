//! The proxy route table.
//!
//! A single owner for the in-memory route set. Reads (listing, match scans)
//! take a shared lock; create/update/delete/reload take the exclusive lock and
//! keep it until the durable copy has been written, so a reload can never
//! interleave with a half-finished CRUD call.
use std::{collections::BTreeMap, sync::Arc};

use http::Method;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::{
    core::path_match::matches_prefix,
    ports::route_store::{RouteStore, RouteStoreError},
};

/// HTTP verbs a route may be restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpVerb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpVerb {
    /// Map a request method onto the verb set; anything else is `None`.
    pub fn from_method(method: &Method) -> Option<Self> {
        match *method {
            Method::GET => Some(Self::Get),
            Method::POST => Some(Self::Post),
            Method::PUT => Some(Self::Put),
            Method::PATCH => Some(Self::Patch),
            Method::DELETE => Some(Self::Delete),
            _ => None,
        }
    }
}

/// A proxy rule: requests under `path` go to `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub id: String,
    pub path: String,
    pub target: String,
    /// Empty means every verb is allowed.
    #[serde(default)]
    pub methods: Vec<HttpVerb>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_enabled: Option<bool>,
}

impl Route {
    pub fn is_proxy_enabled(&self) -> bool {
        self.proxy_enabled.unwrap_or(true)
    }

    pub fn allows(&self, verb: HttpVerb) -> bool {
        self.methods.is_empty() || self.methods.contains(&verb)
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RouteTableError {
    #[error("route already exists: {0}")]
    Conflict(String),

    #[error("route not found: {0}")]
    NotFound(String),

    #[error("invalid route: {0}")]
    Invalid(String),

    #[error("route storage failed: {0}")]
    Store(#[from] RouteStoreError),
}

pub type RouteTableResult<T> = Result<T, RouteTableError>;

/// Outcome of a reload from durable storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadReport {
    /// Routes now in the table.
    pub loaded: usize,
    /// Persisted entries dropped as invalid or as a repeated id.
    pub skipped: usize,
}

pub struct RouteTable {
    routes: RwLock<BTreeMap<String, Route>>,
    store: Option<Arc<dyn RouteStore>>,
}

impl RouteTable {
    /// An empty table. Without a store, persist and reload are no-ops.
    pub fn new(store: Option<Arc<dyn RouteStore>>) -> Self {
        Self {
            routes: RwLock::new(BTreeMap::new()),
            store,
        }
    }

    /// Build a table and populate it from the store. A store with nothing
    /// persisted yet yields an empty table; an unreadable one is logged and
    /// also yields an empty table.
    pub async fn open(store: Option<Arc<dyn RouteStore>>) -> Self {
        let table = Self::new(store);
        match table.reload().await {
            Ok(report) => tracing::info!(
                skipped = report.skipped,
                "Loaded {} routes",
                report.loaded
            ),
            Err(RouteTableError::Store(RouteStoreError::Missing(path))) => {
                tracing::info!("No persisted routes at {}, starting empty", path.display());
            }
            Err(e) => tracing::warn!("Failed to load persisted routes: {}", e),
        }
        table
    }

    pub async fn list(&self) -> Vec<Route> {
        self.routes.read().await.values().cloned().collect()
    }

    pub async fn get(&self, id: &str) -> Option<Route> {
        self.routes.read().await.get(id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.routes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.routes.read().await.is_empty()
    }

    pub async fn create(&self, route: Route) -> RouteTableResult<Route> {
        validate(&route)?;
        let mut routes = self.routes.write().await;
        if routes.contains_key(&route.id) {
            return Err(RouteTableError::Conflict(route.id));
        }
        routes.insert(route.id.clone(), route.clone());
        self.persist_or_warn(&routes).await;
        tracing::info!(route.id = %route.id, route.path = %route.path, "Route created");
        Ok(route)
    }

    /// Replace the route stored under `id`. The id in the path wins over
    /// whatever the body carried.
    pub async fn update(&self, id: &str, mut route: Route) -> RouteTableResult<Route> {
        route.id = id.to_string();
        validate(&route)?;
        let mut routes = self.routes.write().await;
        let Some(slot) = routes.get_mut(id) else {
            return Err(RouteTableError::NotFound(id.to_string()));
        };
        *slot = route.clone();
        self.persist_or_warn(&routes).await;
        tracing::info!(route.id = %id, "Route updated");
        Ok(route)
    }

    pub async fn delete(&self, id: &str) -> RouteTableResult<()> {
        let mut routes = self.routes.write().await;
        if routes.remove(id).is_none() {
            return Err(RouteTableError::NotFound(id.to_string()));
        }
        self.persist_or_warn(&routes).await;
        tracing::info!(route.id = %id, "Route deleted");
        Ok(())
    }

    /// Write the full route set to durable storage.
    pub async fn persist(&self) -> RouteTableResult<()> {
        let routes = self.routes.read().await;
        self.persist_locked(&routes).await
    }

    /// Replace the in-memory table wholesale from durable storage. On any
    /// read or parse failure the current table is left untouched. Invalid
    /// entries are skipped; for a repeated id the first entry wins.
    pub async fn reload(&self) -> RouteTableResult<ReloadReport> {
        let Some(store) = &self.store else {
            return Ok(ReloadReport {
                loaded: self.len().await,
                skipped: 0,
            });
        };
        let mut routes = self.routes.write().await;
        let persisted = store.load().await?;
        let mut fresh = BTreeMap::new();
        let mut skipped = 0;
        for route in persisted {
            if let Err(e) = validate(&route) {
                tracing::warn!("Skipping persisted route: {}", e);
                skipped += 1;
                continue;
            }
            if fresh.contains_key(&route.id) {
                tracing::warn!(route.id = %route.id, "Skipping duplicate persisted route");
                skipped += 1;
                continue;
            }
            fresh.insert(route.id.clone(), route);
        }
        *routes = fresh;
        tracing::debug!("Route table reloaded from {}", store.location());
        Ok(ReloadReport {
            loaded: routes.len(),
            skipped,
        })
    }

    /// Longest-prefix match over proxy-enabled routes allowing `verb`.
    /// Equal-length prefixes resolve to the smallest route id.
    pub async fn find_proxy_route(&self, verb: HttpVerb, path: &str) -> Option<Route> {
        let routes = self.routes.read().await;
        routes
            .values()
            .filter(|route| {
                route.is_proxy_enabled() && route.allows(verb) && matches_prefix(path, &route.path)
            })
            .max_by(|a, b| {
                a.path
                    .len()
                    .cmp(&b.path.len())
                    .then_with(|| b.id.cmp(&a.id))
            })
            .cloned()
    }

    async fn persist_locked(&self, routes: &BTreeMap<String, Route>) -> RouteTableResult<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let list: Vec<Route> = routes.values().cloned().collect();
        store.save(&list).await?;
        Ok(())
    }

    async fn persist_or_warn(&self, routes: &BTreeMap<String, Route>) {
        if let Err(e) = self.persist_locked(routes).await {
            let location = self
                .store
                .as_ref()
                .map(|store| store.location())
                .unwrap_or_default();
            tracing::warn!("Failed to persist routes to {}: {}", location, e);
        }
    }
}

fn validate(route: &Route) -> RouteTableResult<()> {
    if route.id.trim().is_empty() {
        return Err(RouteTableError::Invalid("id must not be empty".to_string()));
    }
    if !route.path.starts_with('/') {
        return Err(RouteTableError::Invalid(format!(
            "path '{}' must start with '/'",
            route.path
        )));
    }
    if route.path.contains('?') {
        return Err(RouteTableError::Invalid(format!(
            "path '{}' must not carry a query string",
            route.path
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(id: &str, path: &str) -> Route {
        Route {
            id: id.to_string(),
            path: path.to_string(),
            target: "http://upstream:9000".to_string(),
            methods: vec![],
            rate_limit: None,
            proxy_enabled: None,
        }
    }

    #[tokio::test]
    async fn test_create_conflict_leaves_route_untouched() {
        let table = RouteTable::new(None);
        table.create(route("r1", "/svc")).await.unwrap();

        let mut dup = route("r1", "/other");
        dup.target = "http://elsewhere".to_string();
        let err = table.create(dup).await.unwrap_err();

        assert!(matches!(err, RouteTableError::Conflict(id) if id == "r1"));
        assert_eq!(table.get("r1").await.unwrap().path, "/svc");
    }

    #[tokio::test]
    async fn test_update_and_delete_missing_are_not_found() {
        let table = RouteTable::new(None);
        table.create(route("r1", "/svc")).await.unwrap();

        assert!(matches!(
            table.update("nope", route("nope", "/x")).await,
            Err(RouteTableError::NotFound(_))
        ));
        assert!(matches!(
            table.delete("nope").await,
            Err(RouteTableError::NotFound(_))
        ));
        assert_eq!(table.list().await, vec![route("r1", "/svc")]);
    }

    #[tokio::test]
    async fn test_update_keeps_path_id() {
        let table = RouteTable::new(None);
        table.create(route("r1", "/svc")).await.unwrap();

        let mut body = route("something-else", "/svc2");
        body.rate_limit = Some(100);
        let updated = table.update("r1", body).await.unwrap();

        assert_eq!(updated.id, "r1");
        assert_eq!(table.get("r1").await.unwrap().rate_limit, Some(100));
        assert!(table.get("something-else").await.is_none());
    }

    #[tokio::test]
    async fn test_longest_prefix_wins() {
        let table = RouteTable::new(None);
        table.create(route("short", "/api")).await.unwrap();
        table.create(route("long", "/api/v2")).await.unwrap();

        let hit = table.find_proxy_route(HttpVerb::Get, "/api/v2/x").await.unwrap();
        assert_eq!(hit.id, "long");
        let hit = table.find_proxy_route(HttpVerb::Get, "/api/v1").await.unwrap();
        assert_eq!(hit.id, "short");
        assert!(table.find_proxy_route(HttpVerb::Get, "/apiv2").await.is_none());
    }

    #[tokio::test]
    async fn test_method_and_proxy_filters() {
        let table = RouteTable::new(None);
        let mut get_only = route("get-only", "/svc");
        get_only.methods = vec![HttpVerb::Get];
        table.create(get_only).await.unwrap();
        let mut disabled = route("disabled", "/svc/inner");
        disabled.proxy_enabled = Some(false);
        table.create(disabled).await.unwrap();

        assert_eq!(
            table
                .find_proxy_route(HttpVerb::Get, "/svc/inner/x")
                .await
                .unwrap()
                .id,
            "get-only"
        );
        assert!(table.find_proxy_route(HttpVerb::Post, "/svc").await.is_none());
    }

    #[tokio::test]
    async fn test_equal_prefix_tie_is_deterministic() {
        let table = RouteTable::new(None);
        table.create(route("b", "/same")).await.unwrap();
        table.create(route("a", "/same")).await.unwrap();

        let hit = table.find_proxy_route(HttpVerb::Get, "/same/x").await.unwrap();
        assert_eq!(hit.id, "a");
    }

    #[test]
    fn test_unknown_verb_rejected_on_decode() {
        let body = r#"{"id":"r1","path":"/svc","target":"http://u","methods":["TRACE"]}"#;
        assert!(serde_json::from_str::<Route>(body).is_err());

        let body = r#"{"id":"r1","path":"/svc","target":"http://u","methods":["GET","PATCH"]}"#;
        let route: Route = serde_json::from_str(body).unwrap();
        assert_eq!(route.methods, vec![HttpVerb::Get, HttpVerb::Patch]);
    }

    #[tokio::test]
    async fn test_invalid_path_rejected() {
        let table = RouteTable::new(None);
        assert!(matches!(
            table.create(route("r1", "svc")).await,
            Err(RouteTableError::Invalid(_))
        ));
        assert!(table.is_empty().await);
    }
}
