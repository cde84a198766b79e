use async_trait::async_trait;
use http::StatusCode;
use thiserror::Error;

use crate::core::{
    GatewayRequest,
    response::{GatewayResponse, empty, text},
};

/// Rejections a plugin may raise from `prepare`.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PluginError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("too many requests")]
    TooManyRequests,

    #[error("service unavailable")]
    ServiceUnavailable,

    /// Anything else; the detail is logged, never returned to the caller.
    #[error("plugin failure: {0}")]
    Internal(String),
}

impl PluginError {
    pub fn status(&self) -> StatusCode {
        match self {
            PluginError::Unauthorized => StatusCode::UNAUTHORIZED,
            PluginError::Forbidden => StatusCode::FORBIDDEN,
            PluginError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            PluginError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            PluginError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn into_response(self) -> GatewayResponse {
        match self {
            PluginError::TooManyRequests => text(self.status(), "too many requests"),
            PluginError::ServiceUnavailable => text(self.status(), "service unavailable"),
            other => empty(other.status()),
        }
    }
}

pub type PluginResult<T> = Result<T, PluginError>;

/// A stage of the request pipeline.
///
/// `prepare` runs in registration order before routing and may rewrite or
/// reject the request. `respond` runs in reverse registration order on the
/// way out. `route` lets a plugin answer a request itself; the first plugin
/// returning `Some` wins.
#[async_trait]
pub trait GatewayPlugin: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn prepare(&self, req: GatewayRequest) -> PluginResult<GatewayRequest> {
        Ok(req)
    }

    async fn respond(
        &self,
        response: GatewayResponse,
        _req: &GatewayRequest,
    ) -> PluginResult<GatewayResponse> {
        Ok(response)
    }

    async fn route(&self, _req: &GatewayRequest) -> Option<GatewayResponse> {
        None
    }
}
