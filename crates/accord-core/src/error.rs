//! Error types for connection driver operations.
//!
//! Protocol failures (bad proofs, removed peers, timeouts) are not Rust
//! errors: they are terminal state transitions that emit an outbound ERROR
//! and a `Disconnected` event. `ConnectionError` covers the other category —
//! misuse of the driver API and codec/crypto failures surfaced to the host.

use thiserror::Error;

use accord_proto::ProtocolError;

use crate::crypto::CryptoError;
use crate::team::TeamError;

/// Errors returned by [`Connection`](crate::Connection) methods.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The connection was stopped; no further operations are accepted
    #[error("connection is stopped")]
    Stopped,

    /// `start` has not been called yet
    #[error("connection not started")]
    NotStarted,

    /// Application sends require a completed handshake
    #[error("no session key: the handshake has not completed")]
    NoSessionKey,

    /// Wire codec failure
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Team operation failure
    #[error(transparent)]
    Team(#[from] TeamError),

    /// Cryptographic failure
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}
