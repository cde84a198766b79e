use async_trait::async_trait;

/// RateLimiter defines the port consulted by the reverse proxy before forwarding.
#[async_trait]
pub trait RateLimiter: Send + Sync + 'static {
    /// Returns `true` when `client_id` may call `route_id` under a budget of
    /// `limit_per_minute` requests.
    async fn allow(&self, route_id: &str, client_id: &str, limit_per_minute: u32) -> bool;

    /// Release the budgets held for `route_id`, keeping the one for
    /// `keep_limit` when the route still exists with that limit.
    async fn forget_route(&self, _route_id: &str, _keep_limit: Option<u32>) {}
}
