//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering all possible failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    // Serialization errors
    /// Failed to serialize data.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize data.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    // Frame errors
    /// Bytes did not decode to a well-formed frame envelope.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The frame `type` tag is not one of the known frame kinds.
    #[error("unknown frame kind: {0}")]
    UnknownFrameKind(String),

    /// Frame exceeds maximum allowed size.
    #[error("frame too large: {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    // Identifier errors
    /// A hash identifier had the wrong length or type prefix.
    #[error("invalid hash: {0}")]
    InvalidHash(String),

    // Cryptographic errors
    /// Signature verification failed.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Invalid or malformed public key.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// The operating system randomness source could not be read.
    #[error("randomness source unavailable: {0}")]
    RandomnessUnavailable(String),

    /// The system clock cannot produce a valid expiry.
    #[error("clock skew: {0}")]
    ClockSkew(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

// Conversions from underlying crate errors

impl From<rmp_serde::encode::Error> for ProtocolError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        ProtocolError::Serialization(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for ProtocolError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        ProtocolError::Deserialization(err.to_string())
    }
}

impl From<ed25519_dalek::SignatureError> for ProtocolError {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        ProtocolError::InvalidSignature(err.to_string())
    }
}

impl From<rand::Error> for ProtocolError {
    fn from(err: rand::Error) -> Self {
        ProtocolError::RandomnessUnavailable(err.to_string())
    }
}
