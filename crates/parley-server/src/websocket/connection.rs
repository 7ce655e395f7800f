//! Per-client connection handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use parley_core::{ConnectionId, RelayError};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a frame could not be queued for a client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryError {
    /// Outbound queue is at capacity.
    Full,
    /// The writer is gone or the connection was closed.
    Closed,
}

impl DeliveryError {
    /// Lift into the relay taxonomy for the recipient `name`.
    pub fn into_relay(self, name: &str) -> RelayError {
        match self {
            Self::Full => RelayError::QueueFull {
                name: name.to_owned(),
            },
            Self::Closed => RelayError::Disconnected,
        }
    }
}

/// Send side of one identified client.
///
/// Frames are pre-serialized JSON shared between recipients. The writer task
/// owning the receiving half forwards them to the socket.
pub struct ClientConnection {
    /// Server-side connection id.
    pub id: ConnectionId,
    tx: mpsc::Sender<Arc<String>>,
    is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    cancel: CancellationToken,
}

impl ClientConnection {
    /// Create a handle. Cancelling `cancel` closes the connection.
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>, cancel: CancellationToken) -> Self {
        Self {
            id,
            tx,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(Instant::now()),
            cancel,
        }
    }

    /// Queue a frame without waiting.
    pub fn send(&self, frame: Arc<String>) -> Result<(), DeliveryError> {
        if self.cancel.is_cancelled() {
            return Err(DeliveryError::Closed);
        }
        self.tx.try_send(frame).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Record inbound activity (pong or any other frame).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    /// Time since the last inbound activity (or since connect).
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Read and reset the alive flag.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Ask the session owning this connection to end. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Whether [`close`](Self::close) was called (or the server is stopping).
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
