//! Typed wrappers over the cryptographic primitives.
//!
//! Ed25519 signatures, X25519 authenticated boxes, and ChaCha20-Poly1305
//! AEAD, each behind a small strongly-typed surface so the rest of the crate
//! never handles raw key bytes ambiguously. All randomness flows in through
//! caller-supplied RNGs.

use chacha20poly1305::aead::generic_array::GenericArray;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::ChaCha20Poly1305;
use crypto_box::aead::Aead as BoxAead;
use crypto_box::SalsaBox;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::{CryptoRng, RngCore};
use thiserror::Error;

use accord_proto::payloads::PublicKeyset;
use accord_proto::Blob;

/// Nonce length for the symmetric session layer.
const AEAD_NONCE_LEN: usize = 12;

/// Nonce length for the asymmetric box.
const BOX_NONCE_LEN: usize = 24;

/// Errors from cryptographic operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Ciphertext failed authentication or was malformed
    #[error("decryption failed")]
    Decryption,

    /// Key bytes did not form a valid key
    #[error("invalid key material")]
    InvalidKey,

    /// Ciphertext too short to contain a nonce
    #[error("ciphertext truncated")]
    Truncated,
}

/// An Ed25519 signing keypair.
///
/// `Debug` shows the public key only.
#[derive(Clone)]
pub struct SigningKeypair(SigningKey);

impl SigningKeypair {
    /// Generate a fresh keypair.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(SigningKey::generate(rng))
    }

    /// Deterministic keypair from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self(SigningKey::from_bytes(seed))
    }

    /// The public verifying key.
    pub fn public(&self) -> [u8; 32] {
        self.0.verifying_key().to_bytes()
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.0.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for SigningKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SigningKeypair({})", &hex::encode(self.public())[..16])
    }
}

/// Verify an Ed25519 signature.
///
/// Returns `false` for bad keys as well as bad signatures; callers only care
/// whether the proof stands.
pub fn verify_signature(public: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(public) else {
        return false;
    };
    let signature = ed25519_dalek::Signature::from_bytes(signature);
    key.verify(message, &signature).is_ok()
}

/// An X25519 keypair for the authenticated box.
#[derive(Clone)]
pub struct BoxKeypair(crypto_box::SecretKey);

impl BoxKeypair {
    /// Generate a fresh keypair.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(crypto_box::SecretKey::generate(rng))
    }

    /// Deterministic keypair from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self(crypto_box::SecretKey::from(*seed))
    }

    /// The public key.
    pub fn public(&self) -> [u8; 32] {
        *self.0.public_key().as_bytes()
    }
}

impl std::fmt::Debug for BoxKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BoxKeypair({})", &hex::encode(self.public())[..16])
    }
}

/// A full keyset: one signing keypair, one encryption keypair.
#[derive(Debug, Clone)]
pub struct KeysetWithSecrets {
    /// Ed25519 signing keypair
    pub signing: SigningKeypair,
    /// X25519 box keypair
    pub encryption: BoxKeypair,
}

impl KeysetWithSecrets {
    /// Generate a fresh keyset.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self { signing: SigningKeypair::generate(rng), encryption: BoxKeypair::generate(rng) }
    }

    /// The public half.
    pub fn public(&self) -> PublicKeyset {
        PublicKeyset { signing: self.signing.public(), encryption: self.encryption.public() }
    }
}

/// Seal a plaintext in an authenticated box to `recipient`, from `sender`.
///
/// Output layout: `nonce (24 bytes) || ciphertext`.
pub fn seal_box<R: RngCore + CryptoRng>(
    rng: &mut R,
    plaintext: &[u8],
    recipient: &[u8; 32],
    sender: &BoxKeypair,
) -> Result<Blob, CryptoError> {
    let recipient = crypto_box::PublicKey::from(*recipient);
    let cipher = SalsaBox::new(&recipient, &sender.0);

    let mut nonce = [0u8; BOX_NONCE_LEN];
    rng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(GenericArray::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Decryption)?;

    let mut out = Vec::with_capacity(BOX_NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(Blob::new(out))
}

/// Open an authenticated box from `sender`, addressed to `recipient`.
pub fn open_box(
    sealed: &Blob,
    sender: &[u8; 32],
    recipient: &BoxKeypair,
) -> Result<Vec<u8>, CryptoError> {
    let bytes = sealed.as_bytes();
    if bytes.len() < BOX_NONCE_LEN {
        return Err(CryptoError::Truncated);
    }
    let (nonce, ciphertext) = bytes.split_at(BOX_NONCE_LEN);

    let sender = crypto_box::PublicKey::from(*sender);
    let cipher = SalsaBox::new(&sender, &recipient.0);
    cipher
        .decrypt(GenericArray::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Decryption)
}

/// Seal a plaintext with a 256-bit symmetric key.
///
/// Output layout: `nonce (12 bytes) || ciphertext`.
pub fn seal<R: RngCore + CryptoRng>(rng: &mut R, key: &[u8; 32], plaintext: &[u8]) -> Blob {
    let cipher = ChaCha20Poly1305::new_from_slice(key).expect("key length is fixed at 32 bytes");

    let mut nonce = [0u8; AEAD_NONCE_LEN];
    rng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(GenericArray::from_slice(&nonce), plaintext)
        .expect("ChaCha20-Poly1305 encryption is infallible for in-memory buffers");

    let mut out = Vec::with_capacity(AEAD_NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Blob::new(out)
}

/// Open a symmetric ciphertext produced by [`seal`].
pub fn open(key: &[u8; 32], sealed: &Blob) -> Result<Vec<u8>, CryptoError> {
    let bytes = sealed.as_bytes();
    if bytes.len() < AEAD_NONCE_LEN {
        return Err(CryptoError::Truncated);
    }
    let (nonce, ciphertext) = bytes.split_at(AEAD_NONCE_LEN);

    let cipher = ChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::InvalidKey)?;
    cipher
        .decrypt(GenericArray::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Decryption)
}

/// Hash arbitrary bytes to 32 bytes.
pub fn hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Fill a 32-byte buffer with cryptographically secure randomness.
pub fn random_32<R: RngCore + CryptoRng>(rng: &mut R) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    rng.fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;

    #[test]
    fn sign_and_verify() {
        let keys = SigningKeypair::generate(&mut OsRng);
        let signature = keys.sign(b"attest");

        assert!(verify_signature(&keys.public(), b"attest", &signature));
        assert!(!verify_signature(&keys.public(), b"altered", &signature));

        let other = SigningKeypair::generate(&mut OsRng);
        assert!(!verify_signature(&other.public(), b"attest", &signature));
    }

    #[test]
    fn signing_deterministic_from_seed() {
        let a = SigningKeypair::from_seed(&[9; 32]);
        let b = SigningKeypair::from_seed(&[9; 32]);
        assert_eq!(a.public(), b.public());
    }

    #[test]
    fn box_round_trip() {
        let alice = BoxKeypair::generate(&mut OsRng);
        let bob = BoxKeypair::generate(&mut OsRng);

        let sealed = seal_box(&mut OsRng, b"seed material", &bob.public(), &alice).unwrap();
        let opened = open_box(&sealed, &alice.public(), &bob).unwrap();
        assert_eq!(opened, b"seed material");
    }

    #[test]
    fn box_rejects_wrong_recipient() {
        let alice = BoxKeypair::generate(&mut OsRng);
        let bob = BoxKeypair::generate(&mut OsRng);
        let eve = BoxKeypair::generate(&mut OsRng);

        let sealed = seal_box(&mut OsRng, b"seed material", &bob.public(), &alice).unwrap();
        assert_eq!(open_box(&sealed, &alice.public(), &eve), Err(CryptoError::Decryption));
    }

    #[test]
    fn aead_round_trip() {
        let key = random_32(&mut OsRng);
        let sealed = seal(&mut OsRng, &key, b"application payload");
        assert_eq!(open(&key, &sealed).unwrap(), b"application payload");
    }

    #[test]
    fn aead_rejects_wrong_key() {
        let sealed = seal(&mut OsRng, &random_32(&mut OsRng), b"payload");
        assert_eq!(open(&random_32(&mut OsRng), &sealed), Err(CryptoError::Decryption));
    }

    #[test]
    fn truncated_ciphertexts_rejected() {
        let key = random_32(&mut OsRng);
        assert_eq!(open(&key, &Blob::new(vec![1, 2, 3])), Err(CryptoError::Truncated));

        let bob = BoxKeypair::generate(&mut OsRng);
        let alice = BoxKeypair::generate(&mut OsRng);
        assert_eq!(
            open_box(&Blob::new(vec![0; 5]), &alice.public(), &bob),
            Err(CryptoError::Truncated)
        );
    }

    #[test]
    fn debug_shows_public_material_only() {
        let keys = KeysetWithSecrets::generate(&mut OsRng);
        let debug = format!("{keys:?}");
        assert!(debug.contains("SigningKeypair"));
        assert!(debug.contains("BoxKeypair"));
    }
}
