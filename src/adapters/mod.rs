pub mod admin_gate;
pub mod document_store;
pub mod fallback;
pub mod http_client;
pub mod http_handler;
pub mod plugins;
pub mod route_store;
pub mod token_validator;
pub mod zone_manager;

/// Re-export commonly used types from adapters
pub use admin_gate::AdminGate;
pub use document_store::{DiskDocumentStore, MemoryDocumentStore};
pub use fallback::{AgentSettings, FallbackHandler};
pub use http_client::HttpClientAdapter;
pub use http_handler::HttpHandler;
pub use plugins::{LoggingPlugin, RoleGuardPlugin};
pub use route_store::FileRouteStore;
pub use token_validator::{HmacTokenValidator, RejectAllValidator};
pub use zone_manager::InMemoryZoneManager;
