pub mod atomic_write;
pub mod graceful_shutdown;
pub mod recent_requests;

pub use atomic_write::write_atomic;
pub use graceful_shutdown::{GracefulShutdown, ShutdownReason, spawn_hangup_handler};
pub use recent_requests::{RecentRequest, RecentRequests};
