pub mod document_store;
pub mod http_client;
pub mod rate_limiter;
pub mod route_store;
pub mod token_validator;
pub mod zone_manager;
