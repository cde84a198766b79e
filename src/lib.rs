//! Gatehouse - an API gateway with an ordered plugin pipeline.
//!
//! Gatehouse follows a **hexagonal architecture**: `ports` declares the traits
//! the gateway consumes (upstream HTTP, route persistence, token validation,
//! rate limiting, document and zone storage), `adapters` implements them, and
//! `core` holds the gateway logic itself.
//!
//! # Features
//! - Route table with CRUD, durable atomic persistence and hot reload
//! - Longest-prefix reverse proxy with per-route rate limits
//! - Per-upstream circuit breaking (closed / open / half-open)
//! - RoleGuard authorization from a polled YAML or JSON rules file
//! - Plugin pipeline (`prepare`, `respond`, optional `route`) with a decision
//!   overlay for destructive operations
//! - Structured access logs via `tracing`, counters via `metrics`
//! - Graceful shutdown and SIGHUP route reload
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use gatehouse::{Gateway, HttpClientAdapter, config::loader::load_config};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let config = load_config(Some("gatehouse.toml")).await?;
//! let client = Arc::new(HttpClientAdapter::with_timeout(config.proxy.timeout()?)?);
//! let gateway = Gateway::build(&config, client).await?;
//! let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
//! axum::serve(listener, gateway.router()).await?;
//! # Ok(()) }
//! ```
//!
//! # Error Handling
//! Components return domain specific `thiserror` enums; startup paths use
//! `eyre::Result<T>` with `WrapErr` context.
//!
//! # Concurrency & Data Structures
//! Shared maps use `scc::HashMap`; the RoleGuard rule set is swapped whole
//! through `arc_swap::ArcSwap`.
pub mod bootstrap;
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{HttpClientAdapter, HttpHandler},
    bootstrap::Gateway,
    ports::http_client::HttpClient,
    utils::{GracefulShutdown, ShutdownReason},
};
