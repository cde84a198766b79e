//! Per-upstream circuit breaker.
//!
//! Entries are keyed by `"{route id}::{scheme}://{host}"` and created lazily on
//! first use. Each transition runs while holding that key's entry lock in the
//! concurrent map, so two requests sharing an upstream can never both flip
//! Closed→Open or both be admitted as the HalfOpen trial request.
//!
//! ```text
//! Closed   --(failures >= threshold)--> Open
//! Open     --(cooldown elapsed)-------> HalfOpen (one trial request admitted)
//! HalfOpen --(trial succeeds)---------> Closed
//! HalfOpen --(trial fails)------------> Open
//! ```
use std::{collections::BTreeMap, time::Duration};

use scc::HashMap;
use serde::Serialize;
use tokio::time::Instant;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerEntry {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

impl BreakerEntry {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            trial_in_flight: false,
        }
    }

    fn trip(&mut self) {
        self.state = BreakerState::Open;
        self.opened_at = Some(Instant::now());
        self.trial_in_flight = false;
    }
}

pub struct CircuitBreaker {
    entries: HashMap<String, BreakerEntry>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_COOLDOWN)
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    /// Whether a request to `key` may be attempted now.
    ///
    /// An Open breaker whose cooldown has elapsed moves to HalfOpen and admits
    /// exactly this caller; every other caller is refused until the trial request
    /// reports back.
    pub async fn allow(&self, key: &str) -> bool {
        let mut entry = self
            .entries
            .entry_async(key.to_string())
            .await
            .or_insert_with(BreakerEntry::new);
        let breaker = entry.get_mut();

        match breaker.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let cooled_down = breaker
                    .opened_at
                    .is_none_or(|opened| opened.elapsed() >= self.cooldown);
                if cooled_down {
                    breaker.state = BreakerState::HalfOpen;
                    breaker.trial_in_flight = true;
                    tracing::info!(breaker.key = %key, "Circuit half-open, admitting trial request");
                }
                cooled_down
            }
            BreakerState::HalfOpen => {
                if breaker.trial_in_flight {
                    false
                } else {
                    breaker.trial_in_flight = true;
                    true
                }
            }
        }
    }

    pub async fn record_success(&self, key: &str) {
        let mut entry = self
            .entries
            .entry_async(key.to_string())
            .await
            .or_insert_with(BreakerEntry::new);
        let breaker = entry.get_mut();

        match breaker.state {
            BreakerState::Closed => breaker.consecutive_failures = 0,
            BreakerState::HalfOpen => {
                breaker.state = BreakerState::Closed;
                breaker.consecutive_failures = 0;
                breaker.trial_in_flight = false;
                tracing::info!(breaker.key = %key, "Circuit closed after successful trial request");
            }
            // A straggler admitted before the trip does not close the circuit.
            BreakerState::Open => {}
        }
    }

    pub async fn record_failure(&self, key: &str) {
        let mut entry = self
            .entries
            .entry_async(key.to_string())
            .await
            .or_insert_with(BreakerEntry::new);
        let breaker = entry.get_mut();

        match breaker.state {
            BreakerState::Closed => {
                breaker.consecutive_failures += 1;
                if breaker.consecutive_failures >= self.failure_threshold {
                    breaker.trip();
                    tracing::warn!(
                        breaker.key = %key,
                        failures = breaker.consecutive_failures,
                        "Circuit opened"
                    );
                }
            }
            BreakerState::HalfOpen => {
                breaker.consecutive_failures += 1;
                breaker.trip();
                tracing::warn!(breaker.key = %key, "Trial request failed, circuit re-opened");
            }
            BreakerState::Open => breaker.consecutive_failures += 1,
        }
    }

    /// Current state of a key, if it has ever been used.
    pub async fn state(&self, key: &str) -> Option<BreakerState> {
        self.entries
            .get_async(key)
            .await
            .map(|entry| entry.get().state)
    }

    /// Drop the entries of `route_id`, except the key named by `keep`.
    /// Returns how many entries were removed.
    pub async fn forget_route(&self, route_id: &str, keep: Option<&str>) -> usize {
        let prefix = format!("{route_id}::");
        let mut removed = 0;
        self.entries
            .retain_async(|key, _| {
                let owned = key.strip_prefix(&prefix).is_some_and(|upstream| {
                    upstream.starts_with("http://") || upstream.starts_with("https://")
                });
                let stale = owned && Some(key.as_str()) != keep;
                if stale {
                    removed += 1;
                }
                !stale
            })
            .await;
        if removed > 0 {
            tracing::debug!(route.id = %route_id, removed, "Dropped breaker entries");
        }
        removed
    }

    /// Count of breakers per state.
    pub async fn metrics(&self) -> BTreeMap<String, u64> {
        let mut closed = 0u64;
        let mut open = 0u64;
        let mut half_open = 0u64;
        self.entries
            .retain_async(|_, breaker| {
                match breaker.state {
                    BreakerState::Closed => closed += 1,
                    BreakerState::Open => open += 1,
                    BreakerState::HalfOpen => half_open += 1,
                }
                true
            })
            .await;

        BTreeMap::from([
            ("breaker_closed".to_string(), closed),
            ("breaker_open".to_string(), open),
            ("breaker_half_open".to_string(), half_open),
        ])
    }
}
