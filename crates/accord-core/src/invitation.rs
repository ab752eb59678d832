//! Invitation proofs and starter keys.
//!
//! An invitation is a shared secret: a human-friendly seed handed to the
//! invitee out of band. Both sides derive the same *starter keypair* from the
//! seed, and the chain records the starter public key when the invitation is
//! created, so an inviter can recognize a newcomer it has never seen before
//! the newcomer has any keys on the chain.
//!
//! The proof the invitee presents binds three things under a starter-key
//! signature: the invitation id, the invitee's claimed name, and the
//! invitee's real public keyset. The signature proves seed possession; the
//! team separately checks the claimed name against the name the invitation
//! was issued for, so possessing a seed is not enough to join under a
//! different identity.

use serde::{Deserialize, Serialize};

use accord_proto::payloads::{InvitationId, Invitee, ProofOfInvitation, PublicKeyset};

use crate::crypto::{self, BoxKeypair, KeysetWithSecrets, SigningKeypair};

/// Normalize a human-transcribed seed.
///
/// Lowercased, trimmed, with `+` treated as a space, so `"abc def"` and
/// `"ABC+DEF"` derive the same keys.
pub fn normalize_seed(seed: &str) -> String {
    seed.trim().to_lowercase().replace('+', " ")
}

/// Derive the deterministic starter keyset for a seed.
///
/// Derivation uses the normalized seed only: a proof signed with starter
/// keys for a forged invitee name still resolves to the real invitation, so
/// the name mismatch is caught and reported as such rather than as an
/// unknown invitation.
pub fn starter_keys(seed: &str) -> KeysetWithSecrets {
    let normalized = normalize_seed(seed);
    let signing_seed = blake3::derive_key("accord/invitation/starter-signing", normalized.as_bytes());
    let encryption_seed =
        blake3::derive_key("accord/invitation/starter-encryption", normalized.as_bytes());
    KeysetWithSecrets {
        signing: SigningKeypair::from_seed(&signing_seed),
        encryption: BoxKeypair::from_seed(&encryption_seed),
    }
}

/// The id of the invitation a seed corresponds to.
///
/// Derived from the starter signing key, so the chain can reference the
/// invitation without storing the seed.
pub fn invitation_id(seed: &str) -> InvitationId {
    let starter = starter_keys(seed);
    id_for_starter_key(&starter.signing.public())
}

/// Invitation id for a recorded starter public key.
pub fn id_for_starter_key(starter_signing: &[u8; 32]) -> InvitationId {
    InvitationId(hex::encode(&crypto::hash(starter_signing)[..8]))
}

/// What the chain records when an invitation is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
    /// Invitation id, derived from the starter key
    pub id: InvitationId,
    /// Who this invitation was issued for
    pub invitee: Invitee,
    /// Starter signing key, used to verify redemption proofs
    #[serde(with = "hex::serde")]
    pub starter_signing: [u8; 32],
}

impl Invitation {
    /// Build the chain record for an invitation seed.
    pub fn new(invitee: Invitee, seed: &str) -> Self {
        let starter_signing = starter_keys(seed).signing.public();
        Self { id: id_for_starter_key(&starter_signing), invitee, starter_signing }
    }
}

/// Generate the proof an invitee presents in HELLO.
pub fn generate_proof(
    seed: &str,
    invitee: Invitee,
    device_name: impl Into<String>,
    keys: PublicKeyset,
) -> ProofOfInvitation {
    let starter = starter_keys(seed);
    let id = id_for_starter_key(&starter.signing.public());
    let device_name = device_name.into();
    let signature = starter.signing.sign(&proof_payload(&id, &invitee, &device_name, &keys));
    ProofOfInvitation { id, invitee, device_name, keys, signature }
}

/// Verify a proof's signature against a recorded starter key.
///
/// Name and revocation checks are the team's job; this only answers "was
/// this proof made with the seed the invitation was created from".
pub fn verify_proof(proof: &ProofOfInvitation, starter_signing: &[u8; 32]) -> bool {
    let payload = proof_payload(&proof.id, &proof.invitee, &proof.device_name, &proof.keys);
    crypto::verify_signature(starter_signing, &payload, &proof.signature)
}

/// Canonical bytes the proof signature covers.
fn proof_payload(
    id: &InvitationId,
    invitee: &Invitee,
    device_name: &str,
    keys: &PublicKeyset,
) -> Vec<u8> {
    #[derive(Serialize)]
    struct Signed<'a> {
        id: &'a InvitationId,
        invitee: &'a Invitee,
        device_name: &'a str,
        keys: &'a PublicKeyset,
    }
    serde_json::to_vec(&Signed { id, invitee, device_name, keys })
        .expect("proof payload serialization cannot fail")
}
