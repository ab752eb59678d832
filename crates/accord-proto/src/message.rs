//! The Accord message set.
//!
//! A tagged union over every message the connection protocol exchanges. The
//! `type` tag uses the protocol's SCREAMING_SNAKE names, so the wire form of
//! a hello is `{"type": "HELLO", ...}`.
//!
//! # Invariants
//!
//! - **Tag uniqueness**: each variant maps to exactly one `type` tag;
//!   [`Message::kind`] returns it for logging and error reporting.
//!
//! - **Local-only kinds**: `LOCAL_UPDATE` is injected by the connection
//!   driver when the local team replica changes and must never be
//!   transmitted. [`Message::is_local`] identifies it and
//!   [`Envelope::encode`](crate::Envelope::encode) refuses to serialize it.
//!
//! - **Exhaustive handling**: all methods match exhaustively; adding a
//!   variant is a compile error until every site handles it.

use serde::{Deserialize, Serialize};

use crate::payloads::{
    AcceptInvitationPayload, ChallengePayload, EncryptedPayload, ErrorPayload, HelloPayload,
    LocalUpdatePayload, MissingLinksPayload, ProvePayload, SeedPayload, UpdatePayload,
};

/// Every message kind in the Accord connection protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Sender's driver has started and is ready to handshake
    Ready,
    /// Identity claim, with proof of invitation if the sender holds one
    Hello(HelloPayload),
    /// Inviter admitted the sender's invitation; carries the chain
    AcceptInvitation(AcceptInvitationPayload),
    /// Nonce challenge against the peer's identity claim
    ChallengeIdentity(ChallengePayload),
    /// Signed response to a challenge
    ProveIdentity(ProvePayload),
    /// The peer's identity proof verified
    AcceptIdentity,
    /// Advertisement of the sender's chain state
    Update(UpdatePayload),
    /// Links the peer advertised it lacks
    MissingLinks(MissingLinksPayload),
    /// Local team replica changed (driver-injected, never on the wire)
    LocalUpdate(LocalUpdatePayload),
    /// Encrypted key-agreement seed
    Seed(SeedPayload),
    /// Application payload sealed with the session key
    EncryptedMessage(EncryptedPayload),
    /// Graceful termination
    Disconnect,
    /// Terminal failure report
    Error(ErrorPayload),
    /// Sender restarted its state machine; peer should do the same
    Reconnect,
}

impl Message {
    /// The wire tag for this message kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Ready => "READY",
            Self::Hello(_) => "HELLO",
            Self::AcceptInvitation(_) => "ACCEPT_INVITATION",
            Self::ChallengeIdentity(_) => "CHALLENGE_IDENTITY",
            Self::ProveIdentity(_) => "PROVE_IDENTITY",
            Self::AcceptIdentity => "ACCEPT_IDENTITY",
            Self::Update(_) => "UPDATE",
            Self::MissingLinks(_) => "MISSING_LINKS",
            Self::LocalUpdate(_) => "LOCAL_UPDATE",
            Self::Seed(_) => "SEED",
            Self::EncryptedMessage(_) => "ENCRYPTED_MESSAGE",
            Self::Disconnect => "DISCONNECT",
            Self::Error(_) => "ERROR",
            Self::Reconnect => "RECONNECT",
        }
    }

    /// True for message kinds that exist only inside a peer and are never
    /// serialized.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::LocalUpdate(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payloads::{Hash, IdentityClaim};

    #[test]
    fn unit_kinds_serialize_as_bare_tags() {
        let json = serde_json::to_value(Message::Ready).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "READY" }));

        let json = serde_json::to_value(Message::AcceptIdentity).unwrap();
        assert_eq!(json, serde_json::json!({ "type": "ACCEPT_IDENTITY" }));
    }

    #[test]
    fn hello_carries_tag_and_fields() {
        let message = Message::Hello(HelloPayload {
            identity_claim: IdentityClaim::device("alice", "laptop"),
            proof_of_invitation: None,
        });
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "HELLO");
        assert_eq!(json["identityClaim"]["name"], "alice::laptop");
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let result: Result<Message, _> =
            serde_json::from_str(r#"{ "type": "TELEPORT", "somewhere": true }"#);
        assert!(result.is_err());
    }

    #[test]
    fn local_update_is_local_only() {
        let message = Message::LocalUpdate(LocalUpdatePayload { head: Hash::from_bytes([0; 32]) });
        assert!(message.is_local());
        assert!(!Message::Ready.is_local());
        assert!(!Message::Reconnect.is_local());
    }

    #[test]
    fn every_kind_round_trips() {
        let messages = [Message::Ready, Message::AcceptIdentity, Message::Disconnect, Message::Reconnect];
        for message in messages {
            let json = serde_json::to_string(&message).unwrap();
            let back: Message = serde_json::from_str(&json).unwrap();
            assert_eq!(message, back);
        }
    }
}
