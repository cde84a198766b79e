//! Per-route, per-client rate limiting built atop `governor`.
//!
//! One keyed GCRA limiter exists per `(route id, limit)` pair and is keyed by
//! client id inside. Changing a route's limit therefore starts a fresh budget
//! instead of reinterpreting the old one.
use std::{num::NonZeroU32, sync::Arc};

use async_trait::async_trait;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::keyed::DefaultKeyedStateStore,
};
use scc::HashMap;

use crate::ports::rate_limiter::RateLimiter as RateLimiterPort;

pub type KeyedRateLimiterImpl<K> = RateLimiter<K, DefaultKeyedStateStore<K>, DefaultClock>;

#[derive(Default)]
pub struct RouteRateLimiter {
    limiters: HashMap<(String, u32), Arc<KeyedRateLimiterImpl<String>>>,
}

impl RouteRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    async fn limiter_for(
        &self,
        route_id: &str,
        per_minute: NonZeroU32,
    ) -> Arc<KeyedRateLimiterImpl<String>> {
        self.limiters
            .entry_async((route_id.to_string(), per_minute.get()))
            .await
            .or_insert_with(|| {
                tracing::debug!(
                    route.id = %route_id,
                    per_minute = per_minute.get(),
                    "Creating route rate limiter"
                );
                Arc::new(RateLimiter::keyed(Quota::per_minute(per_minute)))
            })
            .get()
            .clone()
    }
}

#[async_trait]
impl RateLimiterPort for RouteRateLimiter {
    async fn allow(&self, route_id: &str, client_id: &str, limit_per_minute: u32) -> bool {
        // A zero budget admits nothing.
        let Some(per_minute) = NonZeroU32::new(limit_per_minute) else {
            return false;
        };
        let limiter = self.limiter_for(route_id, per_minute).await;
        limiter.check_key(&client_id.to_string()).is_ok()
    }

    async fn forget_route(&self, route_id: &str, keep_limit: Option<u32>) {
        self.limiters
            .retain_async(|(id, limit), _| id.as_str() != route_id || Some(*limit) == keep_limit)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_budget_is_enforced_per_client() {
        let limiter = RouteRateLimiter::new();
        for _ in 0..3 {
            assert!(limiter.allow("r1", "alice", 3).await);
        }
        assert!(!limiter.allow("r1", "alice", 3).await);
        assert!(limiter.allow("r1", "bob", 3).await);
    }

    #[tokio::test]
    async fn test_routes_have_separate_budgets() {
        let limiter = RouteRateLimiter::new();
        assert!(limiter.allow("r1", "alice", 1).await);
        assert!(!limiter.allow("r1", "alice", 1).await);
        assert!(limiter.allow("r2", "alice", 1).await);
    }

    #[tokio::test]
    async fn test_forget_route_resets_budget() {
        let limiter = RouteRateLimiter::new();
        assert!(limiter.allow("r1", "alice", 1).await);
        assert!(limiter.allow("r2", "alice", 1).await);
        assert!(!limiter.allow("r1", "alice", 1).await);

        limiter.forget_route("r1", Some(1)).await;
        assert!(!limiter.allow("r1", "alice", 1).await);

        limiter.forget_route("r1", None).await;
        assert!(limiter.allow("r1", "alice", 1).await);
        assert!(!limiter.allow("r2", "alice", 1).await);
        assert_eq!(limiter.limiters.len(), 2);
    }

    #[tokio::test]
    async fn test_zero_limit_denies() {
        let limiter = RouteRateLimiter::new();
        assert!(!limiter.allow("r1", "alice", 0).await);
    }
}
