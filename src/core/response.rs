//! Small constructors for the gateway's canned responses.
//!
//! Every terminal error response is either an empty body, a short plain-text
//! body or a JSON `{"error": "..."}` document; internal error text never ends
//! up here.
use axum::body::Body as AxumBody;
use http::{HeaderValue, Response, StatusCode, header};
use serde::Serialize;

/// Response type produced by the pipeline.
pub type GatewayResponse = Response<AxumBody>;

pub fn empty(status: StatusCode) -> GatewayResponse {
    let mut response = Response::new(AxumBody::empty());
    *response.status_mut() = status;
    response
}

pub fn text(status: StatusCode, message: &'static str) -> GatewayResponse {
    let mut response = Response::new(AxumBody::from(message));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

/// Serialize `value` as the JSON body. Falls back to a bare 500 if encoding fails.
pub fn json<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> GatewayResponse {
    match serde_json::to_vec(value) {
        Ok(body) => raw_json(status, body),
        Err(e) => {
            tracing::error!("Failed to encode JSON response: {}", e);
            empty(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Wrap an already encoded JSON document.
pub fn raw_json(status: StatusCode, body: impl Into<AxumBody>) -> GatewayResponse {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

pub fn error_json(status: StatusCode, message: &str) -> GatewayResponse {
    json(status, &serde_json::json!({ "error": message }))
}
