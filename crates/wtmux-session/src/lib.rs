//! wtmux-session: WebTransport session multiplexing
//!
//! Many WebTransport sessions share one QUIC connection. This crate keeps
//! them apart:
//! - [`SessionRegistry`] routes every stream the peer opens to its
//!   [`Session`], parking streams that arrive before their session exists
//! - [`Session`] opens and accepts streams and owns the close handshake
//! - [`Stream`], [`SendStream`] and [`ReceiveStream`] frame outgoing streams
//!   and report WebTransport errors
//!
//! The transport itself is abstracted by [`wtmux_core::Connection`].

pub mod accept_queue;
pub mod registry;
pub mod session;
pub mod stream;
pub mod streams_map;

pub use accept_queue::AcceptQueue;
pub use registry::SessionRegistry;
pub use session::Session;
pub use stream::{ReceiveStream, SendStream, Stream};
pub use streams_map::StreamsMap;

pub use wtmux_core::config::MuxConfig;
pub use wtmux_core::{ConnectionError, MuxError, StreamError};
