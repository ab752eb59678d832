//! Accord protocol core logic
//!
//! This crate contains the per-peer connection state machine for the Accord
//! pairwise team-authentication protocol, together with the helpers it is
//! built from: ordered delivery, invitation proofs, identity challenges,
//! session key agreement, and the team abstraction.
//!
//! # Architecture: Sans-IO
//!
//! Protocol logic is strictly separated from transport concerns. Nothing in
//! this crate performs I/O, reads clocks, or touches global randomness:
//!
//! - Time is passed into methods as [`std::time::Instant`] parameters.
//! - Randomness comes from a caller-supplied `CryptoRng`.
//! - Every operation returns a list of
//!   [`ConnectionAction`](connection::ConnectionAction)s — messages to
//!   transmit and events to surface — which the host executes.
//!
//! This keeps the state machine deterministic: given the same inbound
//! messages and the same RNG, a connection produces the same outputs, which
//! is what makes the permutation and scenario tests in the harness possible.
//!
//! # Modules
//!
//! - [`connection`]: the driver — numbering, buffering, lifecycle, events
//! - [`machine`]: the protocol state machine (handshake, sync, negotiation)
//! - [`delivery`]: ordered delivery buffer (gap-free, duplicate-free)
//! - [`invitation`]: starter keys and proof-of-invitation
//! - [`challenge`]: identity challenge/response
//! - [`session`]: session key derivation and the sealed application layer
//! - [`team`]: the team signature-chain abstraction and an in-memory
//!   reference implementation
//! - [`crypto`]: typed wrappers over the cryptographic primitives
//! - [`identity`]: local user and device identities

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod challenge;
pub mod connection;
pub mod crypto;
pub mod delivery;
pub mod error;
pub mod identity;
pub mod invitation;
pub mod machine;
pub mod session;
pub mod team;

pub use connection::{Connection, ConnectionAction, ConnectionConfig, ConnectionEvent};
pub use error::ConnectionError;
pub use machine::Phase;
pub use team::Team;
