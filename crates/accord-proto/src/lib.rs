//! # Accord Protocol: Wire Format
//!
//! This crate defines the on-wire message set for the Accord pairwise
//! connection protocol: the fourteen message kinds two peers exchange while
//! proving membership in a shared team, admitting an invitee, reconciling
//! their signature chains, and agreeing on a session key.
//!
//! ## Protocol Design
//!
//! Messages are JSON on the wire, as an internally-tagged union:
//!
//! ```json
//! { "index": 3, "type": "CHALLENGE_IDENTITY", "challenge": { ... } }
//! ```
//!
//! - **Envelope**: every transmitted message carries a strictly increasing
//!   `index` assigned by the sender. The receiver reassembles the stream in
//!   index order before any protocol logic runs, so the state machine never
//!   observes reordering or duplication.
//!
//! - **Binary fields**: fixed-size values (hashes, nonces, public keys,
//!   signatures) are hex strings; variable-length blobs (ciphertexts, chain
//!   serializations, links) are base64. Both survive JSON transport and are
//!   cheap to eyeball in logs.
//!
//! ## Security Properties
//!
//! - **Size limits**: [`Envelope::decode`] rejects inputs over
//!   [`MAX_MESSAGE_SIZE`] before parsing begins, bounding allocation from
//!   untrusted peers.
//!
//! - **No silent fallbacks**: unknown `type` tags and malformed fields are
//!   decode errors, never ignored. A peer speaking a different protocol
//!   version fails loudly.
//!
//! - **Secret redaction**: payloads that carry key material or ciphertext
//!   implement `Debug` by length, not content.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod blob;
pub mod envelope;
pub mod errors;
pub mod message;
pub mod payloads;

pub use blob::Blob;
pub use envelope::{Envelope, MAX_MESSAGE_SIZE};
pub use errors::{ProtocolError, Result};
pub use message::Message;
