use std::{future::Future, time::Duration};

use tokio::{signal, task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;

/// Represents different shutdown reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Graceful shutdown requested (SIGTERM, SIGINT)
    Graceful,
    /// Triggered from code (tests, embedding applications)
    Manual,
}

/// Turns OS signals into cancellation of a shared [`CancellationToken`].
///
/// Every long-running task (the HTTP server, the RoleGuard poller, the
/// SIGHUP route reloader) holds a child of the same token and stops when it
/// fires.
pub struct GracefulShutdown {
    token: CancellationToken,
    /// Maximum time to wait for in-flight work once shutdown starts
    shutdown_timeout: Duration,
}

impl GracefulShutdown {
    /// Create a new GracefulShutdown manager with default 30-second timeout
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(shutdown_timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            shutdown_timeout,
        }
    }

    /// A token cancelled when shutdown starts.
    pub fn token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn trigger_shutdown(&self, reason: ShutdownReason) {
        if !self.token.is_cancelled() {
            tracing::info!("Shutdown triggered: {:?}", reason);
            self.token.cancel();
        }
    }

    /// Wait for SIGINT or SIGTERM (or a manual trigger), then cancel the token.
    pub async fn run_signal_handler(&self) -> ShutdownReason {
        tracing::info!("Signal handler started. Listening for SIGTERM and SIGINT");

        let reason = tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
                ShutdownReason::Graceful
            }
            _ = wait_for_sigterm() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                ShutdownReason::Graceful
            }
            _ = self.token.cancelled() => ShutdownReason::Manual,
        };
        self.token.cancel();
        reason
    }

    /// Wait for `task` to finish, giving up after the shutdown timeout.
    pub async fn drain(&self, task: JoinHandle<()>) {
        match timeout(self.shutdown_timeout, task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Task failed during shutdown: {}", e),
            Err(_) => tracing::error!(
                "Shutdown timeout exceeded ({:?}), abandoning task",
                self.shutdown_timeout
            ),
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::error!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    // On non-Unix systems, we only have Ctrl+C
    std::future::pending::<()>().await;
}

/// Run `on_hangup` on every SIGHUP until `cancel` fires.
#[cfg(unix)]
pub fn spawn_hangup_handler<F, Fut>(cancel: CancellationToken, on_hangup: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    use tokio::signal::unix::{SignalKind, signal};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(hangup) => hangup,
            Err(e) => {
                tracing::error!("Failed to register SIGHUP handler: {}", e);
                return;
            }
        };
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    tracing::info!("Received SIGHUP");
                    on_hangup().await;
                }
            }
        }
    })
}

#[cfg(not(unix))]
pub fn spawn_hangup_handler<F, Fut>(cancel: CancellationToken, _on_hangup: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move { cancel.cancelled().await })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_graceful_shutdown_creation() {
        let shutdown = GracefulShutdown::new();
        assert!(!shutdown.is_shutdown_initiated());
        assert!(!shutdown.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_manual_trigger_cancels_children() {
        let shutdown = GracefulShutdown::new();
        let first = shutdown.token();
        let second = shutdown.token();

        shutdown.trigger_shutdown(ShutdownReason::Manual);

        assert!(shutdown.is_shutdown_initiated());
        assert!(first.is_cancelled());
        assert!(second.is_cancelled());
    }

    #[tokio::test]
    async fn test_signal_handler_returns_on_manual_trigger() {
        let shutdown = std::sync::Arc::new(GracefulShutdown::new());
        let handler = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.run_signal_handler().await })
        };
        tokio::task::yield_now().await;
        shutdown.trigger_shutdown(ShutdownReason::Manual);
        assert_eq!(handler.await.unwrap(), ShutdownReason::Manual);
    }

    #[tokio::test]
    async fn test_drain_times_out() {
        let shutdown = GracefulShutdown::with_timeout(Duration::from_millis(20));
        let stuck = tokio::spawn(std::future::pending::<()>());
        shutdown.drain(stuck).await;
    }
}
