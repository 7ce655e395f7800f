//! # parley-core
//!
//! Pure building blocks of the chat relay. Nothing in this crate performs I/O
//! or holds shared state.
//!
//! - [`envelope`]: outbound envelopes (chat messages and room events)
//! - [`inbound`]: messages sent by clients (`identify`, `send`)
//! - [`color`]: deterministic username → display color mapping
//! - [`processor`]: inbound message + session context → outbound envelope
//! - [`errors`]: the relay error taxonomy

#![deny(unsafe_code)]

pub mod color;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod inbound;
pub mod processor;

pub use color::{USER_COLORS, assign_color};
pub use envelope::{Envelope, EnvelopeBody, EnvelopeType, RoomAction, SessionContext};
pub use errors::{RelayError, Result};
pub use ids::{ConnectionId, EnvelopeId};
pub use inbound::ClientMessage;
pub use processor::transform;
