//! Raw stream traits
//!
//! These describe the streams handed out by the transport before any
//! WebTransport framing is applied. Implementations must be safe to use
//! from several tasks at once: the send and receive halves of one
//! bidirectional stream are driven independently.

use async_trait::async_trait;
use tokio::time::Instant;
use wtmux_proto::StreamId;

use crate::error::TransportError;

/// Anything that names a transport stream
pub trait StreamHandle: Send + Sync + 'static {
    /// Transport-level stream ID
    fn stream_id(&self) -> StreamId;
}

/// Sending half of a raw stream
#[async_trait]
pub trait RawSendStream: StreamHandle {
    /// Write bytes, returning how many were accepted
    async fn write(&self, buf: &[u8]) -> Result<usize, TransportError>;

    /// Finish the stream after all written data
    fn close(&self) -> Result<(), TransportError>;

    /// Abruptly terminate sending with an HTTP/3 error code
    fn cancel_write(&self, code: u64);

    /// Deadline for pending and future writes (`None` clears it)
    fn set_write_deadline(&self, deadline: Option<Instant>) -> Result<(), TransportError>;
}

/// Receiving half of a raw stream
#[async_trait]
pub trait RawRecvStream: StreamHandle {
    /// Read bytes into `buf`; `Ok(0)` marks the end of the stream
    async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Ask the peer to stop sending, with an HTTP/3 error code
    fn cancel_read(&self, code: u64);

    /// Deadline for pending and future reads (`None` clears it)
    fn set_read_deadline(&self, deadline: Option<Instant>) -> Result<(), TransportError>;
}

/// A bidirectional raw stream
pub trait RawStream: RawSendStream + RawRecvStream {}

impl<T: RawSendStream + RawRecvStream> RawStream for T {}
