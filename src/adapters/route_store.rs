use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::{
    core::route_table::Route,
    ports::route_store::{RouteStore, RouteStoreError, RouteStoreResult},
    utils::write_atomic,
};

/// Routes persisted as a pretty-printed JSON array in a single file.
#[derive(Debug, Clone)]
pub struct FileRouteStore {
    path: PathBuf,
}

impl FileRouteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RouteStore for FileRouteStore {
    async fn load(&self) -> RouteStoreResult<Vec<Route>> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RouteStoreError::Missing(self.path.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&data)?)
    }

    async fn save(&self, routes: &[Route]) -> RouteStoreResult<()> {
        let data = serde_json::to_vec_pretty(routes)?;
        write_atomic(&self.path, &data).await?;
        tracing::debug!("Persisted {} routes to {}", routes.len(), self.path.display());
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}
