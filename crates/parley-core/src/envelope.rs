//! Outbound envelopes.
//!
//! Every envelope shares a header (`type`, `id`, `user`) and carries one of
//! two bodies, discriminated on the wire by `message_type`:
//!
//! ```json
//! {"type":"message","message_type":"message","id":"…","user":"bob",
//!  "time":"2026-01-01T00:00:00.000Z","usercolor":"teal","message":"hi"}
//! {"type":"message","message_type":"room","id":"…","user":"bob","action":"join"}
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::color::assign_color;
use crate::ids::EnvelopeId;

/// Per-connection data fixed at identification time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionContext {
    /// Username the client identified with.
    pub username: String,
    /// Display color derived from the username.
    pub usercolor: &'static str,
}

impl SessionContext {
    /// Build a context for `username`, assigning its display color.
    pub fn new(username: impl Into<String>) -> Self {
        let username = username.into();
        let usercolor = assign_color(&username);
        Self {
            username,
            usercolor,
        }
    }
}

/// Top-level envelope type. The relay only emits `"message"` envelopes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeType {
    /// Chat traffic and room events.
    Message,
}

/// Room membership change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomAction {
    /// A user finished identification.
    Join,
    /// A previously identified user disconnected.
    Leave,
}

/// Envelope payload, tagged by `message_type`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum EnvelopeBody {
    /// Chat text from a user.
    Message {
        /// RFC 3339 UTC timestamp with millisecond precision.
        time: String,
        /// Sender's display color.
        usercolor: String,
        /// Message text as sent.
        message: String,
    },
    /// Join/leave notice.
    Room {
        /// What happened.
        action: RoomAction,
    },
}

/// Outbound envelope. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Always [`EnvelopeType::Message`].
    #[serde(rename = "type")]
    pub envelope_type: EnvelopeType,
    /// Fresh id per envelope.
    pub id: EnvelopeId,
    /// Originating username.
    pub user: String,
    /// Kind-specific payload.
    #[serde(flatten)]
    pub body: EnvelopeBody,
}

impl Envelope {
    /// Chat message stamped with the current time.
    pub fn chat(ctx: &SessionContext, message: impl Into<String>) -> Self {
        Self::chat_at(ctx, message, Utc::now())
    }

    /// Chat message stamped with `time`.
    pub fn chat_at(ctx: &SessionContext, message: impl Into<String>, time: DateTime<Utc>) -> Self {
        Self {
            envelope_type: EnvelopeType::Message,
            id: EnvelopeId::new(),
            user: ctx.username.clone(),
            body: EnvelopeBody::Message {
                time: time.to_rfc3339_opts(SecondsFormat::Millis, true),
                usercolor: ctx.usercolor.to_owned(),
                message: message.into(),
            },
        }
    }

    /// Room event for `user`.
    pub fn room(user: impl Into<String>, action: RoomAction) -> Self {
        Self {
            envelope_type: EnvelopeType::Message,
            id: EnvelopeId::new(),
            user: user.into(),
            body: EnvelopeBody::Room { action },
        }
    }

    /// Wire name of the body kind (`"message"` or `"room"`), for logging.
    pub fn message_type(&self) -> &'static str {
        match self.body {
            EnvelopeBody::Message { .. } => "message",
            EnvelopeBody::Room { .. } => "room",
        }
    }

    /// Serialize to the JSON text frame sent to clients.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::Value;

    fn ctx(name: &str) -> SessionContext {
        SessionContext::new(name)
    }

    #[test]
    fn context_assigns_color() {
        let c = ctx("bob");
        assert_eq!(c.username, "bob");
        assert_eq!(c.usercolor, assign_color("bob"));
    }

    #[test]
    fn chat_envelope_wire_shape() {
        let time = Utc.with_ymd_and_hms(2026, 1, 1, 12, 30, 0).unwrap();
        let env = Envelope::chat_at(&ctx("bob"), "hi", time);
        let v: Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();

        assert_eq!(v["type"], "message");
        assert_eq!(v["message_type"], "message");
        assert_eq!(v["user"], "bob");
        assert_eq!(v["usercolor"], assign_color("bob"));
        assert_eq!(v["message"], "hi");
        assert_eq!(v["time"], "2026-01-01T12:30:00.000Z");
        assert_eq!(v["id"], env.id.to_string());
        assert_eq!(v.as_object().unwrap().len(), 7);
    }

    #[test]
    fn room_envelope_wire_shape() {
        let env = Envelope::room("alice", RoomAction::Join);
        let v = serde_json::to_value(&env).unwrap();

        assert_eq!(v["type"], "message");
        assert_eq!(v["message_type"], "room");
        assert_eq!(v["user"], "alice");
        assert_eq!(v["action"], "join");
        assert!(v["id"].is_string());
        assert!(v.get("message").is_none());
        assert!(v.get("time").is_none());
        assert_eq!(v.as_object().unwrap().len(), 5);
    }

    #[test]
    fn leave_action_serializes_lowercase() {
        let env = Envelope::room("alice", RoomAction::Leave);
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["action"], "leave");
    }

    #[test]
    fn envelopes_get_distinct_ids() {
        let a = Envelope::room("alice", RoomAction::Join);
        let b = Envelope::room("alice", RoomAction::Join);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn parses_back_from_wire() {
        let env = Envelope::chat(&ctx("carol"), "hello there");
        let json = env.to_json().unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, env);
    }

    #[test]
    fn message_type_names() {
        assert_eq!(Envelope::chat(&ctx("a"), "x").message_type(), "message");
        assert_eq!(Envelope::room("a", RoomAction::Leave).message_type(), "room");
    }

    #[test]
    fn chat_time_is_utc_millis() {
        let env = Envelope::chat(&ctx("a"), "x");
        let EnvelopeBody::Message { time, .. } = &env.body else {
            panic!("expected chat body");
        };
        assert!(time.ends_with('Z'), "got {time}");
        assert!(DateTime::parse_from_rfc3339(time).is_ok());
    }
}
