//! Relay error taxonomy.
//!
//! Disconnects and lookups of absent names are ordinary events in a chat
//! relay, so they are modelled as variants rather than panics. Callers use
//! [`RelayError::is_expected`] to decide whether an error is worth more than a
//! debug log line.

use thiserror::Error;

/// Errors produced by the relay core and the connection registry.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The transport (or the connection's outbound queue) is gone.
    #[error("connection closed")]
    Disconnected,

    /// A unicast recipient is not currently registered.
    #[error("recipient not found: {name}")]
    NotFound {
        /// Username that was looked up.
        name: String,
    },

    /// The recipient's outbound queue is full; it was evicted.
    #[error("outbound queue full for {name}")]
    QueueFull {
        /// Username whose queue overflowed.
        name: String,
    },

    /// An inbound message kind the relay cannot handle in the current state.
    #[error("unsupported message kind: {kind}")]
    UnsupportedKind {
        /// Value of the inbound `type` field.
        kind: String,
    },

    /// Inbound text is not a well-formed client message.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The first message on a connection was not a valid identification.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// An envelope could not be serialized.
    #[error("failed to serialize envelope: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RelayError {
    /// Whether this error is part of normal operation (disconnect races,
    /// absent recipients, slow consumers).
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::Disconnected | Self::NotFound { .. } | Self::QueueFull { .. }
        )
    }

    /// Whether this error ends the session that produced it.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            Self::Disconnected
                | Self::UnsupportedKind { .. }
                | Self::Malformed(_)
                | Self::ProtocolViolation(_)
        )
    }

    /// Short classification string for logs and metric labels.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::NotFound { .. } => "not_found",
            Self::QueueFull { .. } => "queue_full",
            Self::UnsupportedKind { .. } => "unsupported_kind",
            Self::Malformed(_) => "malformed",
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::Serialization(_) => "serialization",
        }
    }
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
