//! Identity challenge/response.
//!
//! Knowing a device id proves nothing; the peer must show it controls the
//! device's signing key. We issue a nonce challenge over the claim, the peer
//! signs the canonical serialization of the whole challenge, and the team
//! verifies the signature against the device key recorded on the chain.

use rand::{CryptoRng, RngCore};
use serde::Serialize;

use accord_proto::payloads::{Challenge, IdentityClaim};

use crate::crypto::{self, SigningKeypair};

/// Issue a challenge against a claim with a fresh 256-bit nonce.
pub fn issue<R: RngCore + CryptoRng>(rng: &mut R, claim: IdentityClaim) -> Challenge {
    Challenge { claim, nonce: crypto::random_32(rng) }
}

/// Answer a challenge by signing it with the device signing key.
pub fn prove(challenge: &Challenge, signing: &SigningKeypair) -> [u8; 64] {
    signing.sign(&challenge_payload(challenge))
}

/// Verify a challenge response against a device's public signing key.
pub fn verify(challenge: &Challenge, public: &[u8; 32], proof: &[u8; 64]) -> bool {
    crypto::verify_signature(public, &challenge_payload(challenge), proof)
}

/// Canonical bytes a challenge response signs.
fn challenge_payload(challenge: &Challenge) -> Vec<u8> {
    #[derive(Serialize)]
    struct Signed<'a> {
        claim: &'a IdentityClaim,
        #[serde(with = "hex::serde")]
        nonce: [u8; 32],
    }
    serde_json::to_vec(&Signed { claim: &challenge.claim, nonce: challenge.nonce })
        .expect("challenge serialization cannot fail")
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;

    #[test]
    fn prove_and_verify() {
        let keys = SigningKeypair::generate(&mut OsRng);
        let challenge = issue(&mut OsRng, IdentityClaim::device("bob", "phone"));

        let proof = prove(&challenge, &keys);
        assert!(verify(&challenge, &keys.public(), &proof));
    }

    #[test]
    fn proof_binds_the_nonce() {
        let keys = SigningKeypair::generate(&mut OsRng);
        let claim = IdentityClaim::device("bob", "phone");

        let challenge = issue(&mut OsRng, claim.clone());
        let proof = prove(&challenge, &keys);

        // Same claim, different nonce: the old proof must not transfer.
        let other = issue(&mut OsRng, claim);
        assert!(!verify(&other, &keys.public(), &proof));
    }

    #[test]
    fn proof_binds_the_claim() {
        let keys = SigningKeypair::generate(&mut OsRng);
        let challenge = issue(&mut OsRng, IdentityClaim::device("bob", "phone"));
        let proof = prove(&challenge, &keys);

        let mut forged = challenge.clone();
        forged.claim = IdentityClaim::device("bob", "laptop");
        assert!(!verify(&forged, &keys.public(), &proof));
    }

    #[test]
    fn wrong_key_fails() {
        let keys = SigningKeypair::generate(&mut OsRng);
        let other = SigningKeypair::generate(&mut OsRng);
        let challenge = issue(&mut OsRng, IdentityClaim::device("bob", "phone"));

        let proof = prove(&challenge, &keys);
        assert!(!verify(&challenge, &other.public(), &proof));
    }
}
