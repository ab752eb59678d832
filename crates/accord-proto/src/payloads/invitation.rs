//! Invitation payloads: proof-of-invitation and the admission reply.

use serde::{Deserialize, Serialize};

use crate::blob::Blob;
use crate::payloads::identity::KeyScope;
use crate::payloads::keyset::PublicKeyset;

/// Identifier of an invitation, derived from the starter signing key.
///
/// Both sides can compute it from the seed; the chain records it when the
/// invitation is created, so proofs can be matched without revealing the seed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InvitationId(pub String);

impl std::fmt::Display for InvitationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The principal an invitation was issued for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invitee {
    /// Member invitation (new user) or device invitation (new device for an
    /// existing user, named `user::device`)
    pub kind: KeyScope,
    /// Invitee name
    pub name: String,
}

/// Proof that the sender holds an invitation seed.
///
/// The signature is made with the starter signing key derived from the seed
/// and covers `(id, invitee, keys)`. Carrying the invitee's real public
/// keyset lets the inviter place those keys on the chain at admission, so the
/// identity challenge that follows is verifiable before chains have fully
/// synchronized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofOfInvitation {
    /// Which invitation this proof redeems
    pub id: InvitationId,
    /// Who is redeeming it
    pub invitee: Invitee,
    /// Name of the device the invitee is joining from
    pub device_name: String,
    /// The invitee's real public keys, to be recorded on the chain
    pub keys: PublicKeyset,
    /// Starter-key signature over `(id, invitee, deviceName, keys)`
    #[serde(with = "hex::serde")]
    pub signature: [u8; 64],
}

/// ACCEPT_INVITATION: the inviter's reply after admitting the invitee.
///
/// Carries the inviter's full serialized chain so the newcomer can construct
/// its team replica and verify its own invitation is on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptInvitationPayload {
    /// Serialized signature chain, opaque at this layer
    pub chain: Blob,
}
