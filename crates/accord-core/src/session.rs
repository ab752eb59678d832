//! Session key agreement and the sealed application layer.
//!
//! Each peer contributes a random 256-bit seed, encrypted to the other's
//! device key. The session key is derived from both seeds with a derivation
//! that is symmetric in its arguments, so the two sides compute the same key
//! regardless of which role they played in the handshake.

use rand::{CryptoRng, RngCore};

use accord_proto::Blob;

use crate::crypto::{self, CryptoError};

/// One peer's contribution to key agreement.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyAgreementSeed(
    /// Raw seed bytes
    pub [u8; 32],
);

impl KeyAgreementSeed {
    /// Generate a fresh random seed.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(crypto::random_32(rng))
    }

    /// Reconstruct a seed received from the peer.
    ///
    /// Returns `None` unless the input is exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Some(Self(bytes.try_into().ok()?))
    }
}

impl std::fmt::Debug for KeyAgreementSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyAgreementSeed(<redacted>)")
    }
}

/// The symmetric key protecting application messages after the handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    /// Derive the session key from the two contributed seeds.
    ///
    /// The seeds are ordered lexicographically before derivation, so
    /// `derive(a, b) == derive(b, a)`.
    pub fn derive(ours: &KeyAgreementSeed, theirs: &KeyAgreementSeed) -> Self {
        let (lo, hi) = if ours.0 <= theirs.0 { (&ours.0, &theirs.0) } else { (&theirs.0, &ours.0) };

        let mut hasher = blake3::Hasher::new_derive_key("accord/session-key");
        hasher.update(lo);
        hasher.update(hi);
        Self(*hasher.finalize().as_bytes())
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Seal an application payload.
    pub fn seal<R: RngCore + CryptoRng>(&self, rng: &mut R, payload: &[u8]) -> Blob {
        crypto::seal(rng, &self.0, payload)
    }

    /// Open a sealed application payload.
    pub fn open(&self, sealed: &Blob) -> Result<Vec<u8>, CryptoError> {
        crypto::open(&self.0, sealed)
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(<redacted>)")
    }
}
