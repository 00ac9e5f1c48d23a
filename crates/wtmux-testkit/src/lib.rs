//! wtmux-testkit: an in-memory transport for wtmux
//!
//! [`MemConnection::pair`] returns two connected endpoints. Streams opened on
//! one side show up on the other through [`MemConnection::accept_stream`] and
//! [`MemConnection::accept_uni_stream`]. Stream limits, resets, STOP_SENDING,
//! deadlines and connection loss behave closely enough to QUIC for the
//! session layer to be driven end to end without a network.
//!
//! [`loopback`] adds just enough of HTTP/3 on top to request sessions and
//! route their streams through a [`wtmux_session::SessionRegistry`].

mod connection;
pub mod loopback;
mod pipe;
mod stream;

pub use connection::{MemConnection, PairBuilder, Side};
pub use stream::{MemRecvStream, MemSendStream, MemStream};
