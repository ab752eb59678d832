//! Public key material as it appears on the wire and on the chain.

use serde::{Deserialize, Serialize};

/// The public half of a member's or device's keyset.
///
/// Two independent keys: Ed25519 for signatures, X25519 for the authenticated
/// box used during key agreement. Hex on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyset {
    /// Ed25519 verifying key
    #[serde(with = "hex::serde")]
    pub signing: [u8; 32],
    /// X25519 public key
    #[serde(with = "hex::serde")]
    pub encryption: [u8; 32],
}

impl std::fmt::Debug for PublicKeyset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKeyset")
            .field("signing", &&hex::encode(self.signing)[..16])
            .field("encryption", &&hex::encode(self.encryption)[..16])
            .finish()
    }
}
