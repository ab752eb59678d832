//! Chain synchronization and key agreement payloads.

use serde::{Deserialize, Serialize};

use crate::blob::Blob;

/// A 32-byte chain link hash, hex on the wire.
///
/// The protocol treats hashes as opaque identifiers; the team implementation
/// decides what they cover.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hash(#[serde(with = "hex::serde")] pub [u8; 32]);

impl Hash {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash({})", &hex::encode(self.0)[..16])
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// UPDATE: advertise the sender's current view of the signature chain.
///
/// The receiver compares `hashes` against its own links to compute the delta
/// it should push back via MISSING_LINKS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePayload {
    /// Genesis hash of the sender's chain
    pub root: Hash,
    /// Most recent link hash of the sender's chain
    pub head: Hash,
    /// Every link hash the sender holds
    pub hashes: Vec<Hash>,
}

/// MISSING_LINKS: deliver the links the peer advertised it lacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingLinksPayload {
    /// Sender's head after including these links
    pub head: Hash,
    /// Serialized links, opaque to the protocol layer
    pub links: Vec<Blob>,
}

/// LOCAL_UPDATE: the local team replica changed under us.
///
/// Injected by the connection driver when the shared team mutates; never
/// transmitted to the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalUpdatePayload {
    /// New head of the local chain
    pub head: Hash,
}

/// SEED: the sender's contribution to session key agreement.
///
/// The seed is encrypted with an authenticated asymmetric box from the
/// sender's device encryption key to the recipient's, so only the intended
/// peer can read it and the recipient knows who sent it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedPayload {
    /// Boxed 32-byte seed
    pub encrypted_seed: Blob,
}
