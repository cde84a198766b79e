pub mod circuit_breaker;
pub mod decision;
pub mod path_match;
pub mod plugin;
pub mod proxy;
pub mod rate_limiter;
pub mod response;
pub mod role_guard;
pub mod route_table;

use bytes::Bytes;

/// A request with its body fully buffered, as seen by plugins and handlers.
pub type GatewayRequest = http::Request<Bytes>;

pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use decision::{Decision, DecisionEvaluator, DecisionOrchestrator, DestructiveGuardian};
pub use plugin::{GatewayPlugin, PluginError, PluginResult};
pub use proxy::ReverseProxy;
pub use rate_limiter::RouteRateLimiter;
pub use response::GatewayResponse;
pub use role_guard::{GuardDecision, RoleGuardStore, RoleRequirement};
pub use route_table::{HttpVerb, ReloadReport, Route, RouteTable, RouteTableError};
