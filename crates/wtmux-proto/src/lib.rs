//! wtmux-proto: Wire protocol for wtmux session multiplexing
//!
//! This crate defines the byte-level formats used when many WebTransport
//! sessions share one HTTP/3 connection: the header that tags every locally
//! opened stream with its session, the capsules carried on a session's
//! control stream, and the embedding of application stream error codes
//! into the HTTP/3 error code space.

pub mod capsule;
pub mod error;
pub mod error_code;
pub mod frame;
pub mod session;
pub mod varint;

pub use capsule::{
    Capsule, CapsuleCodec, CloseSession, CLOSE_WEBTRANSPORT_SESSION, MAX_CAPSULE_SIZE,
};
pub use error::ProtocolError;
pub use error_code::{SessionErrorCode, StreamErrorCode};
pub use frame::{StreamHeader, StreamKind};
pub use session::{SessionId, StreamId};
