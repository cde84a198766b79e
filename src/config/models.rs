//! Configuration data structures for Gatehouse.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files and
//! `GATEHOUSE_*` environment variables. Every field has a default so an empty
//! file, or no file at all, yields a runnable gateway.
use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

fn default_listen_addr() -> String {
    "0.0.0.0:8010".to_string()
}

fn default_routes_path() -> PathBuf {
    PathBuf::from("Configuration/routes.json")
}

fn default_poll_interval() -> String {
    "2s".to_string()
}

fn default_rate_limit() -> u32 {
    60
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown() -> String {
    "30s".to_string()
}

fn default_proxy_timeout() -> String {
    "30s".to_string()
}

fn default_max_body() -> usize {
    10 * 1024 * 1024
}

fn default_corpus() -> String {
    "agents".to_string()
}

/// Parse a humantime duration such as `"250ms"`, `"2s"` or `"5m"`.
pub fn parse_duration(value: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(value)
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 secret for bearer tokens. Without it every token is rejected.
    pub jwt_secret: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BreakerConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// How long an open breaker rejects calls before letting a trial request through.
    #[serde(default = "default_cooldown")]
    pub cooldown: String, // Parsed by humantime
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown: default_cooldown(),
        }
    }
}

impl BreakerConfig {
    pub fn cooldown(&self) -> Result<Duration, humantime::DurationError> {
        parse_duration(&self.cooldown)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProxyConfig {
    /// Upper bound on a single upstream exchange.
    #[serde(default = "default_proxy_timeout")]
    pub timeout: String,
    /// Largest request body, in bytes, the gateway buffers. Larger bodies get 413.
    #[serde(default = "default_max_body")]
    pub max_body: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            timeout: default_proxy_timeout(),
            max_body: default_max_body(),
        }
    }
}

impl ProxyConfig {
    pub fn timeout(&self) -> Result<Duration, humantime::DurationError> {
        parse_duration(&self.timeout)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default = "default_corpus")]
    pub corpus: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_id: None,
            corpus: default_corpus(),
        }
    }
}

/// Destructive-operation guard settings. The guard is only installed when
/// `sensitive_prefixes` is non-empty.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct GuardianConfig {
    pub sensitive_prefixes: Vec<String>,
    pub privileged_tokens: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_routes_path")]
    pub routes_path: PathBuf,
    #[serde(default)]
    pub roleguard_path: Option<PathBuf>,
    #[serde(default = "default_poll_interval")]
    pub roleguard_poll_interval: String,
    /// Requests per minute for routes that do not set their own limit.
    #[serde(default = "default_rate_limit")]
    pub default_rate_limit: u32,
    /// Root of the disk document store; in-memory when unset.
    #[serde(default)]
    pub store_dir: Option<PathBuf>,
    #[serde(default)]
    pub openapi_path: Option<PathBuf>,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub guardian: GuardianConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            routes_path: default_routes_path(),
            roleguard_path: None,
            roleguard_poll_interval: default_poll_interval(),
            default_rate_limit: default_rate_limit(),
            store_dir: None,
            openapi_path: None,
            auth: AuthConfig::default(),
            breaker: BreakerConfig::default(),
            proxy: ProxyConfig::default(),
            agent: AgentConfig::default(),
            guardian: GuardianConfig::default(),
        }
    }
}

impl GatewayConfig {
    pub fn roleguard_poll_interval(&self) -> Result<Duration, humantime::DurationError> {
        parse_duration(&self.roleguard_poll_interval)
    }
}
