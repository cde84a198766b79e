//! Metrics for the gateway.
//!
//! Two sinks are fed side by side:
//! * the `metrics` crate facade (`gatehouse_*` names below), for whatever
//!   recorder the embedding binary installs;
//! * [`GatewayMetrics`], an in-process counter registry backing the JSON
//!   snapshot served on `GET /metrics`.
//!
//! Provided facade metrics:
//! * `gatehouse_requests_total` (counter; labels method, status)
//! * `gatehouse_request_duration_seconds` (histogram; label method)
//! * `gatehouse_upstream_requests_total` (counter; labels route, status)
use std::{collections::BTreeMap, time::Instant};

use metrics::{Unit, counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::Lazy;
use scc::HashMap;

pub const GATEHOUSE_REQUESTS_TOTAL: &str = "gatehouse_requests_total";
pub const GATEHOUSE_REQUEST_DURATION_SECONDS: &str = "gatehouse_request_duration_seconds";
pub const GATEHOUSE_UPSTREAM_REQUESTS_TOTAL: &str = "gatehouse_upstream_requests_total";

// Snapshot counter names
pub const REQUESTS_TOTAL: &str = "requests_total";
pub const ROLEGUARD_UNAUTHORIZED_TOTAL: &str = "roleguard_unauthorized_total";
pub const ROLEGUARD_FORBIDDEN_TOTAL: &str = "roleguard_forbidden_total";
pub const ROLEGUARD_RELOADS_TOTAL: &str = "roleguard_reloads_total";
pub const ROLEGUARD_ACTIVE_RULES: &str = "roleguard_active_rules";

static DESCRIPTIONS: Lazy<()> = Lazy::new(|| {
    describe_counter!(
        GATEHOUSE_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of HTTP requests answered by the gateway."
    );
    describe_histogram!(
        GATEHOUSE_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of HTTP requests answered by the gateway."
    );
    describe_counter!(
        GATEHOUSE_UPSTREAM_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of requests forwarded to upstream services."
    );
});

/// Register metric descriptions with the installed recorder (idempotent).
pub fn init_metrics() -> eyre::Result<()> {
    Lazy::force(&DESCRIPTIONS);
    tracing::info!("Gatehouse metrics described");
    Ok(())
}

pub fn increment_request_total(method: &str, status: u16) {
    counter!(
        GATEHOUSE_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

pub fn record_request_duration(method: &str, duration: std::time::Duration) {
    histogram!(
        GATEHOUSE_REQUEST_DURATION_SECONDS,
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Count one forwarded request; transport failures are reported as 502.
pub fn increment_upstream_request_total(route_id: &str, status: u16) {
    counter!(
        GATEHOUSE_UPSTREAM_REQUESTS_TOTAL,
        "route" => route_id.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// RAII helper measuring inbound request duration.
pub struct RequestTimer {
    start: Instant,
    method: String,
}

impl RequestTimer {
    pub fn new(method: &str) -> Self {
        Self {
            start: Instant::now(),
            method: method.to_string(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        record_request_duration(&self.method, self.start.elapsed());
    }
}

/// In-process counters behind the `/metrics` JSON snapshot.
#[derive(Default)]
pub struct GatewayMetrics {
    counters: HashMap<String, u64>,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn increment(&self, name: &str) {
        *self
            .counters
            .entry_async(name.to_string())
            .await
            .or_insert(0)
            .get_mut() += 1;
    }

    pub async fn set(&self, name: &str, value: u64) {
        *self
            .counters
            .entry_async(name.to_string())
            .await
            .or_insert(0)
            .get_mut() = value;
    }

    pub async fn get(&self, name: &str) -> u64 {
        self.counters
            .get_async(name)
            .await
            .map(|entry| *entry.get())
            .unwrap_or(0)
    }

    /// Count a finished request under its method and status.
    pub async fn record_request(&self, method: &str, status: u16) {
        self.increment(REQUESTS_TOTAL).await;
        self.increment(&format!("requests_method_{method}")).await;
        self.increment(&format!("requests_status_{status}")).await;
        increment_request_total(method, status);
    }

    pub async fn snapshot(&self) -> BTreeMap<String, u64> {
        let mut out = BTreeMap::new();
        self.counters
            .retain_async(|name, value| {
                out.insert(name.clone(), *value);
                true
            })
            .await;
        out
    }
}
