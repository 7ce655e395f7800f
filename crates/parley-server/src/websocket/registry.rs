//! Username → connection registry and fan-out.
//!
//! A single mutex guards membership. Delivery happens under that mutex but
//! never waits: each recipient has a bounded queue fed with `try_send`. All
//! broadcasts are therefore totally ordered, and every recipient sees them
//! in the order `broadcast` was called.
//!
//! A recipient that cannot take a frame is removed in the same call, so a
//! connection that is still registered has received every frame.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use parking_lot::Mutex;
use parley_core::{ConnectionId, Envelope, RelayError, Result};
use tracing::{debug, info, warn};

use super::connection::{ClientConnection, DeliveryError};
use crate::metrics::{CHAT_BROADCAST_PRUNED_TOTAL, CHAT_SLOW_CLIENT_EVICTIONS_TOTAL};

/// Outcome of one [`ConnectionRegistry::broadcast`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Registrations present when the broadcast started.
    pub recipients: usize,
    /// Recipients whose queue accepted the frame.
    pub delivered: usize,
    /// Usernames removed because their connection was gone or its queue full.
    pub pruned: Vec<String>,
}

/// Who is connected right now.
pub struct ConnectionRegistry {
    entries: Mutex<HashMap<String, Arc<ClientConnection>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Insert or replace the entry for `name`.
    ///
    /// A replaced connection is closed so its session ends; it is returned
    /// to the caller.
    pub fn register(
        &self,
        name: impl Into<String>,
        connection: Arc<ClientConnection>,
    ) -> Option<Arc<ClientConnection>> {
        let name = name.into();
        let new_id = connection.id.clone();
        let previous = self.entries.lock().insert(name.clone(), connection);
        if let Some(prev) = &previous {
            if prev.id != new_id {
                info!(username = %name, old = %prev.id, new = %new_id, "registration replaced");
                prev.close();
            }
        }
        debug!(username = %name, conn_id = %new_id, "registered");
        previous
    }

    /// Remove the entry for `name`. Absent names are a no-op.
    pub fn unregister(&self, name: &str) -> Option<Arc<ClientConnection>> {
        let removed = self.entries.lock().remove(name);
        if removed.is_some() {
            debug!(username = name, "unregistered");
        }
        removed
    }

    /// Remove `name` only if it still maps to connection `id`.
    ///
    /// Returns `false` when the name is absent or was re-registered by a newer
    /// connection.
    pub fn unregister_connection(&self, name: &str, id: &ConnectionId) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(name) {
            Some(conn) if conn.id == *id => {
                let _ = entries.remove(name);
                debug!(username = name, conn_id = %id, "unregistered");
                true
            }
            _ => false,
        }
    }

    /// Whether `name` is currently registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.lock().contains_key(name)
    }

    /// Whether `name` could be taken by a new client.
    pub fn is_available(&self, name: &str) -> bool {
        !name.is_empty() && !self.contains(name)
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nobody is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Sorted snapshot of registered usernames.
    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.lock().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Deliver `envelope` to every registration.
    ///
    /// A recipient whose queue is closed or full is closed and removed on
    /// the spot; the others still get the frame.
    pub fn broadcast(&self, envelope: &Envelope) -> Result<BroadcastReport> {
        let frame = Arc::new(envelope.to_json()?);
        let mut entries = self.entries.lock();
        let mut report = BroadcastReport {
            recipients: entries.len(),
            ..BroadcastReport::default()
        };

        entries.retain(|name, conn| match conn.send(Arc::clone(&frame)) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(err) => {
                evict(name, conn, err);
                report.pruned.push(name.clone());
                false
            }
        });
        drop(entries);

        if !report.pruned.is_empty() {
            counter!(CHAT_BROADCAST_PRUNED_TOTAL).increment(report.pruned.len() as u64);
        }
        debug!(
            message_type = envelope.message_type(),
            user = %envelope.user,
            recipients = report.recipients,
            delivered = report.delivered,
            pruned = report.pruned.len(),
            "broadcast"
        );
        Ok(report)
    }

    /// Deliver `envelope` to `recipient` only.
    ///
    /// An unregistered recipient is [`RelayError::NotFound`]. A closed or
    /// full one is removed and reported as [`RelayError::Disconnected`] or
    /// [`RelayError::QueueFull`].
    pub fn send_to(&self, envelope: &Envelope, recipient: &str) -> Result<()> {
        let frame = Arc::new(envelope.to_json()?);
        let mut entries = self.entries.lock();
        let conn = entries.get(recipient).ok_or_else(|| RelayError::NotFound {
            name: recipient.to_owned(),
        })?;

        match conn.send(frame) {
            Ok(()) => Ok(()),
            Err(err) => {
                evict(recipient, conn, err);
                let _ = entries.remove(recipient);
                counter!(CHAT_BROADCAST_PRUNED_TOTAL).increment(1);
                Err(err.into_relay(recipient))
            }
        }
    }
}

fn evict(name: &str, conn: &ClientConnection, err: DeliveryError) {
    match err {
        DeliveryError::Closed => {
            debug!(username = name, conn_id = %conn.id, "pruning closed connection");
        }
        DeliveryError::Full => {
            warn!(username = name, conn_id = %conn.id, "evicting slow client");
            counter!(CHAT_SLOW_CLIENT_EVICTIONS_TOTAL).increment(1);
        }
    }
    conn.close();
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
