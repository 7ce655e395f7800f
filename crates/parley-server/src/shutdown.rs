//! Server-wide stop signal and session draining.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Root cancellation token plus the set of running sessions.
///
/// Sessions hold child tokens, so [`shutdown`](Self::shutdown) reaches all
/// of them; each then sends its going-away close frame before finishing.
#[derive(Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    sessions: TaskTracker,
}

impl ShutdownCoordinator {
    /// Create a coordinator that has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// A clone of the root token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Tracker that session tasks are spawned under.
    pub fn sessions(&self) -> &TaskTracker {
        &self.sessions
    }

    /// Cancel every session and the accept loop.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Cancel, then wait up to `timeout` for the serve task and every
    /// session to finish. Returns `false` if the deadline passed first.
    pub async fn graceful_shutdown(&self, server: JoinHandle<()>, timeout: Duration) -> bool {
        self.shutdown();
        let _ = self.sessions.close();
        info!(
            sessions = self.sessions.len(),
            timeout_secs = timeout.as_secs(),
            "draining sessions"
        );

        let drain = async {
            if let Err(e) = server.await {
                warn!(error = %e, "serve task failed");
            }
            self.sessions.wait().await;
        };
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!(
                remaining = self.sessions.len(),
                "shutdown timed out after {timeout:?}"
            );
            return false;
        }
        true
    }
}
