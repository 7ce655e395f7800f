//! Inbound message → outbound envelope.

use crate::envelope::{Envelope, SessionContext};
use crate::errors::{RelayError, Result};
use crate::inbound::ClientMessage;

/// Turn a message from an identified client into the envelope to broadcast.
///
/// Only `send` is meaningful once a session is active; every other kind
/// (including a second `identify`) is [`RelayError::UnsupportedKind`].
pub fn transform(inbound: &ClientMessage, ctx: &SessionContext) -> Result<Envelope> {
    match inbound {
        ClientMessage::Send { message } => Ok(Envelope::chat(ctx, message.as_str())),
        other => Err(RelayError::UnsupportedKind {
            kind: other.kind().to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::assign_color;
    use crate::envelope::{EnvelopeBody, EnvelopeType};
    use assert_matches::assert_matches;

    #[test]
    fn send_becomes_chat_envelope() {
        let ctx = SessionContext::new("bob");
        let env = transform(&ClientMessage::Send { message: "hi".into() }, &ctx).unwrap();

        assert_eq!(env.envelope_type, EnvelopeType::Message);
        assert_eq!(env.user, "bob");
        assert_matches!(
            env.body,
            EnvelopeBody::Message { ref usercolor, ref message, .. }
                if usercolor == assign_color("bob") && message == "hi"
        );
    }

    #[test]
    fn each_transform_gets_a_new_id() {
        let ctx = SessionContext::new("bob");
        let msg = ClientMessage::Send { message: "hi".into() };
        let a = transform(&msg, &ctx).unwrap();
        let b = transform(&msg, &ctx).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn empty_text_is_relayed() {
        let ctx = SessionContext::new("bob");
        let env = transform(&ClientMessage::Send { message: String::new() }, &ctx).unwrap();
        assert_matches!(env.body, EnvelopeBody::Message { ref message, .. } if message.is_empty());
    }

    #[test]
    fn unknown_kind_is_unsupported() {
        let ctx = SessionContext::new("bob");
        let err = transform(&ClientMessage::Unknown { kind: "typing".into() }, &ctx).unwrap_err();
        assert_matches!(err, RelayError::UnsupportedKind { ref kind } if kind == "typing");
    }

    #[test]
    fn second_identify_is_unsupported() {
        let ctx = SessionContext::new("bob");
        let msg = ClientMessage::Identify {
            username: "mallory".into(),
        };
        assert_matches!(
            transform(&msg, &ctx),
            Err(RelayError::UnsupportedKind { ref kind }) if kind == "identify"
        );
    }
}
