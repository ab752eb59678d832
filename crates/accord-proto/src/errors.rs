//! Error types for the Accord wire format.
//!
//! All errors are structured, testable, and provide actionable information.

use thiserror::Error;

/// Protocol-level errors that can occur while encoding or decoding messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Failed to encode a message as JSON
    #[error("failed to encode message: {0}")]
    Encode(String),

    /// Failed to decode a message from JSON
    #[error("failed to decode message: {0}")]
    Decode(String),

    /// Message exceeds the maximum allowed size
    #[error("message too large: {size} bytes exceeds maximum {max}")]
    MessageTooLarge {
        /// Actual encoded size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Attempted to transmit a message that is local-only
    #[error("message kind {0} is local-only and never goes on the wire")]
    NotTransmittable(&'static str),

    /// A hex or base64 field failed to parse
    #[error("invalid binary field {field}: {reason}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// Parse failure description
        reason: String,
    },
}

/// Convenient Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
