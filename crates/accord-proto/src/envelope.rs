//! Numbered envelopes: the unit of transmission.
//!
//! Every message a peer sends is wrapped in an [`Envelope`] carrying a
//! strictly increasing `index`. Indices start at 0, are assigned by the
//! sender's driver, are never reused for the life of a connection, and are a
//! 64-bit counter so overflow is not a practical concern.
//!
//! The receiver feeds envelopes through an ordered-delivery buffer that
//! reassembles the index sequence before the state machine sees anything, so
//! protocol logic is written against an in-order, duplicate-free stream.

use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};
use crate::message::Message;

/// Maximum encoded size of a single message (16 MB).
///
/// Chain blobs ride inside ACCEPT_INVITATION and MISSING_LINKS, so the limit
/// is generous; anything larger is rejected before JSON parsing begins.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// A message tagged with its position in the sender's outbound sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Position in the sender's outbound sequence, from 0
    pub index: u64,
    /// The message itself; its `type` tag flattens into the envelope object
    #[serde(flatten)]
    pub message: Message,
}

impl Envelope {
    /// Wrap a message at the given index.
    #[must_use]
    pub fn new(index: u64, message: Message) -> Self {
        Self { index, message }
    }

    /// Encode to wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::NotTransmittable`] for local-only message
    /// kinds and [`ProtocolError::Encode`] if JSON serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.message.is_local() {
            return Err(ProtocolError::NotTransmittable(self.message.kind()));
        }
        serde_json::to_vec(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Decode from wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MessageTooLarge`] for oversized inputs
    /// (checked before parsing) and [`ProtocolError::Decode`] for malformed
    /// JSON, unknown tags, or bad fields.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::MessageTooLarge {
                size: bytes.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}
