//! Identifier newtypes.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique id stamped on every outbound envelope.
///
/// Serialized as a bare hyphenated UUID; clients use it as a list key.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvelopeId(Uuid);

impl EnvelopeId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EnvelopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Server-side id of one accepted transport.
///
/// Never sent to clients. Lets a session tell its own registry entry apart
/// from a newer one registered under the same username.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generate a new time-ordered id (`conn_<uuid v7>`).
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ConnectionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_ids_are_unique() {
        let a = EnvelopeId::new();
        let b = EnvelopeId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn envelope_id_serializes_as_plain_uuid() {
        let id = EnvelopeId::new();
        let json = serde_json::to_value(id).unwrap();
        let text = json.as_str().unwrap();
        assert_eq!(text.len(), 36);
        assert!(Uuid::parse_str(text).is_ok());
        assert_eq!(text, id.to_string());
    }

    #[test]
    fn envelope_id_is_v4() {
        let id = EnvelopeId::new();
        let uuid = Uuid::parse_str(&id.to_string()).unwrap();
        assert_eq!(uuid.get_version_num(), 4);
    }

    #[test]
    fn connection_id_has_prefix() {
        let id = ConnectionId::new();
        assert!(id.as_str().starts_with("conn_"), "got: {id}");
        assert_eq!(id.as_ref(), id.as_str());
    }

    #[test]
    fn connection_ids_are_monotonic() {
        let ids: Vec<ConnectionId> = (0..50).map(|_| ConnectionId::new()).collect();
        for w in ids.windows(2) {
            assert!(w[0].as_str() < w[1].as_str(), "not monotonic: {} >= {}", w[0], w[1]);
        }
    }
}
