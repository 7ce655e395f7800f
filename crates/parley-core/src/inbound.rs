//! Messages sent by clients.

use serde::Deserialize;
use serde_json::Value;

use crate::errors::{RelayError, Result};

/// A parsed client message, keyed on the JSON `type` field.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// First message on every connection.
    Identify {
        /// Requested username.
        username: String,
    },
    /// Chat text to broadcast.
    Send {
        /// Free-form text.
        message: String,
    },
    /// Any other `type`. Never produced by serde directly; see [`ClientMessage::parse`].
    #[serde(skip)]
    Unknown {
        /// The unrecognized `type` value.
        kind: String,
    },
}

impl ClientMessage {
    /// Parse a text frame.
    ///
    /// Unknown `type` values parse successfully as [`ClientMessage::Unknown`];
    /// deciding whether that is acceptable is left to the caller.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| RelayError::Malformed(e.to_string()))?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| RelayError::Malformed("missing `type` field".into()))?
            .to_owned();

        match kind.as_str() {
            "identify" | "send" => {
                serde_json::from_value(value).map_err(|e| RelayError::Malformed(e.to_string()))
            }
            other => Ok(Self::Unknown {
                kind: other.to_owned(),
            }),
        }
    }

    /// Wire name of this message's `type`.
    pub fn kind(&self) -> &str {
        match self {
            Self::Identify { .. } => "identify",
            Self::Send { .. } => "send",
            Self::Unknown { kind } => kind,
        }
    }

    /// Extract the username from an identification message.
    ///
    /// Anything other than an `identify` with a non-empty username is a
    /// protocol violation.
    pub fn into_username(self) -> Result<String> {
        match self {
            Self::Identify { username } if !username.is_empty() => Ok(username),
            Self::Identify { .. } => Err(RelayError::ProtocolViolation("empty username".into())),
            other => Err(RelayError::ProtocolViolation(format!(
                "expected identify, got {}",
                other.kind()
            ))),
        }
    }
}
