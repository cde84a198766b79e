use async_trait::async_trait;
use http::HeaderValue;

use crate::core::{
    GatewayRequest,
    plugin::{GatewayPlugin, PluginResult},
    response::GatewayResponse,
};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Tags every request with an `x-request-id` and echoes it on the response.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPlugin;

#[async_trait]
impl GatewayPlugin for LoggingPlugin {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn prepare(&self, mut req: GatewayRequest) -> PluginResult<GatewayRequest> {
        if !req.headers().contains_key(REQUEST_ID_HEADER) {
            let id = uuid::Uuid::new_v4().to_string();
            if let Ok(value) = HeaderValue::from_str(&id) {
                req.headers_mut().insert(REQUEST_ID_HEADER, value);
            }
        }
        tracing::debug!(
            request_id = ?req.headers().get(REQUEST_ID_HEADER),
            "{} {}",
            req.method(),
            req.uri().path()
        );
        Ok(req)
    }

    async fn respond(
        &self,
        mut response: GatewayResponse,
        req: &GatewayRequest,
    ) -> PluginResult<GatewayResponse> {
        if let Some(id) = req.headers().get(REQUEST_ID_HEADER) {
            response
                .headers_mut()
                .entry(REQUEST_ID_HEADER)
                .or_insert_with(|| id.clone());
        }
        Ok(response)
    }
}
