//! wtmux-core: Core abstractions and configuration for wtmux
//!
//! This crate provides the transport capability traits the session layer is
//! written against, the error taxonomy shared by every crate, and the
//! configuration structures.

pub mod config;
pub mod error;
pub mod io;
pub mod traits;
pub mod types;

pub use error::{ConfigError, ConnectionError, MuxError, StreamError, TransportError};
pub use traits::{Connection, RawRecvStream, RawSendStream, RawStream, StreamHandle};
pub use types::ConnectionId;

/// Result type used across the wtmux crates
pub type Result<T> = std::result::Result<T, MuxError>;
