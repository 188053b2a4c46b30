//! Error types for framelink.

use thiserror::Error;

/// Main error type for all framelink operations.
#[derive(Debug, Error)]
pub enum FramelinkError {
    /// I/O error from a transport implementation.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Payload exceeds the 255-byte wire limit.
    #[error("Payload of {0} bytes exceeds the 255-byte frame limit")]
    PayloadTooLarge(usize),

    /// The outbound buffer bound would be exceeded.
    #[error("Outbound buffer full ({used} of {max} bytes in use)")]
    BufferFull { used: usize, max: usize },

    /// Attempt to send a reserved control kind (254 or 255).
    #[error("Packet kind {0} is reserved for protocol control frames")]
    ReservedKind(u8),
}

/// Result type alias using FramelinkError.
pub type Result<T> = std::result::Result<T, FramelinkError>;
