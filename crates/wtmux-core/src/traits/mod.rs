//! Core trait definitions

mod connection;
mod stream;

pub use connection::Connection;
pub use stream::{RawRecvStream, RawSendStream, RawStream, StreamHandle};
