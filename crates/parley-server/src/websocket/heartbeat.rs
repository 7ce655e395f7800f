//! Ping/pong liveness policy.

use std::time::Duration;

use super::connection::ClientConnection;

/// What the writer should do on a heartbeat tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeartbeatVerdict {
    /// Send another Ping.
    Ping,
    /// Nothing heard within the timeout; drop the client.
    TimedOut,
}

/// Heartbeat timing for one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Heartbeat {
    /// Time between Pings.
    pub interval: Duration,
    /// Silence after which the client is considered dead.
    pub timeout: Duration,
}

impl Heartbeat {
    /// Evaluate liveness on a tick. Resets the connection's alive flag.
    pub fn tick(&self, connection: &ClientConnection) -> HeartbeatVerdict {
        if !connection.check_alive() && connection.last_pong_elapsed() > self.timeout {
            HeartbeatVerdict::TimedOut
        } else {
            HeartbeatVerdict::Ping
        }
    }
}
