//! Application-layer and error payloads.

use serde::{Deserialize, Serialize};

use crate::blob::Blob;

/// ENCRYPTED_MESSAGE: an application payload sealed with the session key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedPayload {
    /// AEAD ciphertext, nonce prepended
    pub payload: Blob,
}

/// Machine-readable error taxonomy, shared by the wire and the connection
/// context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Identity
    /// Claimed member is not on the team
    MemberUnknown,
    /// Claimed member was removed from the team
    MemberRemoved,
    /// Claimed device is not on the team
    DeviceUnknown,
    /// Claimed device was removed from the team
    DeviceRemoved,
    /// Challenge response failed verification
    IdentityProofInvalid,

    // Invitation
    /// Proof of invitation failed validation
    InvitationInvalid,
    /// The invitation was revoked before redemption
    InvitationRevoked,
    /// The received chain does not contain our invitation
    WrongTeam,
    /// Both peers hold invitations; neither can admit the other
    NeitherIsMember,

    // Membership
    /// The peer was removed from the team during this connection
    PeerRemoved,

    // Protocol
    /// A handshake phase did not complete in time
    Timeout,
    /// A ciphertext failed to decrypt
    DecryptionFailed,
    /// The peer reported an error and closed its side
    PeerError,
}

/// ERROR: a terminal failure report sent to the peer.
///
/// Messages are human-readable and deliberately free of internal detail; the
/// `code` is what programs should branch on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Error classification
    pub code: ErrorCode,
    /// Human-readable description
    pub message: String,
}
