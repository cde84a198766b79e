use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::route_table::Route;

/// Error type for durable route storage
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RouteStoreError {
    /// Nothing has been persisted yet
    #[error("Route file not found: {0}")]
    Missing(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed route document: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type RouteStoreResult<T> = Result<T, RouteStoreError>;

/// RouteStore defines the port for durable route persistence.
///
/// Implementations must make `save` atomic: a reader (or a crash) never
/// observes a partially written document.
#[async_trait]
pub trait RouteStore: Send + Sync + 'static {
    /// Load the full persisted route set.
    async fn load(&self) -> RouteStoreResult<Vec<Route>>;

    /// Replace the persisted route set.
    async fn save(&self, routes: &[Route]) -> RouteStoreResult<()>;

    /// Human readable location, used in log lines.
    fn location(&self) -> String;
}
