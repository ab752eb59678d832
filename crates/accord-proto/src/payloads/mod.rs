//! Payload types for the Accord message set.
//!
//! Each wire message kind has a corresponding payload struct. Field names
//! follow the protocol's camelCase JSON convention; binary fields use hex
//! (fixed-size) or base64 (variable-length).

pub mod app;
pub mod identity;
pub mod invitation;
pub mod keyset;
pub mod sync;

pub use app::{EncryptedPayload, ErrorCode, ErrorPayload};
pub use identity::{Challenge, ChallengePayload, HelloPayload, IdentityClaim, KeyScope, ProvePayload};
pub use invitation::{AcceptInvitationPayload, InvitationId, Invitee, ProofOfInvitation};
pub use keyset::PublicKeyset;
pub use sync::{Hash, LocalUpdatePayload, MissingLinksPayload, SeedPayload, UpdatePayload};
