//! Protocol error types

use thiserror::Error;

/// Errors that can occur while encoding or decoding wire data
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Value does not fit in a QUIC variable-length integer
    #[error("Value {0} exceeds the varint maximum of 2^62-1")]
    VarintOverflow(u64),

    /// Stream started with a type other than the WebTransport ones
    #[error("Unexpected stream type: {0:#x}")]
    UnexpectedStreamType(u64),

    /// HTTP/3 error code outside the WebTransport application range
    #[error("Error code {0:#x} outside of the WebTransport range")]
    ErrorCodeOutOfRange(u64),

    /// HTTP/3 error code that falls on a reserved (grease) code point
    #[error("Error code {0:#x} is a reserved code point")]
    ReservedErrorCode(u64),

    /// Capsule exceeds maximum size
    #[error("Capsule too large: {size} bytes exceeds maximum of {max} bytes")]
    CapsuleTooLarge { size: u64, max: usize },

    /// Close capsule shorter than its fixed error code field
    #[error("Truncated close capsule: expected at least {expected} bytes, got {actual}")]
    TruncatedCapsule { expected: usize, actual: usize },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
