//! Identity claims and the challenge/response payloads.

use serde::{Deserialize, Serialize};

use crate::payloads::invitation::ProofOfInvitation;

/// What kind of principal a claim or invitation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyScope {
    /// A team member (a user)
    Member,
    /// A single device belonging to a user
    Device,
}

/// An identity asserted by a peer, verified against the signature chain.
///
/// Device claims use the stable id form `user::device`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityClaim {
    /// Scope of the claim
    pub kind: KeyScope,
    /// Principal name (`user::device` for device claims)
    pub name: String,
}

impl IdentityClaim {
    /// A device claim for the given user/device pair.
    pub fn device(user_name: &str, device_name: &str) -> Self {
        Self { kind: KeyScope::Device, name: format!("{user_name}::{device_name}") }
    }

    /// Split a device claim back into `(user, device)` names.
    ///
    /// Returns `None` for member claims or malformed names.
    pub fn split_device(&self) -> Option<(&str, &str)> {
        if self.kind != KeyScope::Device {
            return None;
        }
        self.name.split_once("::")
    }
}

/// A nonce challenge issued against an identity claim.
///
/// The responder signs the canonical serialization of the whole challenge, so
/// the signature binds both the claim and the nonce.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    /// The claim being challenged
    pub claim: IdentityClaim,
    /// 256-bit random nonce
    #[serde(with = "hex::serde")]
    pub nonce: [u8; 32],
}

impl std::fmt::Debug for Challenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Nonce redacted: it is unpredictable material a log reader never needs.
        f.debug_struct("Challenge").field("claim", &self.claim).field("nonce", &"<redacted>").finish()
    }
}

/// HELLO: the opening message from each side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloPayload {
    /// Who the sender claims to be
    pub identity_claim: IdentityClaim,
    /// Present iff the sender holds an invitation it has not yet redeemed
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub proof_of_invitation: Option<ProofOfInvitation>,
}

/// CHALLENGE_IDENTITY: ask the peer to prove its claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengePayload {
    /// The challenge to sign
    pub challenge: Challenge,
}

/// PROVE_IDENTITY: the signed response to a challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvePayload {
    /// Echo of the challenge being answered
    pub challenge: Challenge,
    /// Ed25519 signature over the canonical challenge
    #[serde(with = "hex::serde")]
    pub proof: [u8; 64],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_claim_round_trips_name() {
        let claim = IdentityClaim::device("alice", "laptop");
        assert_eq!(claim.name, "alice::laptop");
        assert_eq!(claim.split_device(), Some(("alice", "laptop")));
    }

    #[test]
    fn member_claim_does_not_split() {
        let claim = IdentityClaim { kind: KeyScope::Member, name: "alice".into() };
        assert_eq!(claim.split_device(), None);
    }

    #[test]
    fn hello_omits_absent_proof() {
        let hello = HelloPayload {
            identity_claim: IdentityClaim::device("alice", "laptop"),
            proof_of_invitation: None,
        };
        let json = serde_json::to_value(&hello).unwrap();
        assert!(json.get("proofOfInvitation").is_none());
    }

    #[test]
    fn challenge_debug_redacts_nonce() {
        let challenge =
            Challenge { claim: IdentityClaim::device("alice", "laptop"), nonce: [3; 32] };
        let debug = format!("{challenge:?}");
        assert!(!debug.contains("0303"));
    }
}
