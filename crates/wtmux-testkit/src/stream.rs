//! In-memory stream halves

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use wtmux_core::{RawRecvStream, RawSendStream, StreamHandle, TransportError};
use wtmux_proto::StreamId;

use crate::pipe::Pipe;

/// Sending half of an in-memory stream
#[derive(Debug, Clone)]
pub struct MemSendStream {
    id: StreamId,
    pipe: Arc<Pipe>,
}

impl MemSendStream {
    pub(crate) fn new(id: StreamId, pipe: Arc<Pipe>) -> Self {
        Self { id, pipe }
    }

    /// Code of the peer's STOP_SENDING, if it sent one
    pub fn stop_sending_code(&self) -> Option<u64> {
        self.pipe.stop_sending_code()
    }

    /// How many times the peer called cancel_read
    pub fn stop_sending_count(&self) -> usize {
        self.pipe.stop_sending_calls()
    }
}

impl StreamHandle for MemSendStream {
    fn stream_id(&self) -> StreamId {
        self.id
    }
}

#[async_trait]
impl RawSendStream for MemSendStream {
    async fn write(&self, buf: &[u8]) -> Result<usize, TransportError> {
        self.pipe.write(buf).await
    }

    fn close(&self) -> Result<(), TransportError> {
        self.pipe.finish()
    }

    fn cancel_write(&self, code: u64) {
        tracing::trace!("{} cancel_write({:#x})", self.id, code);
        self.pipe.reset(code);
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) -> Result<(), TransportError> {
        self.pipe.set_write_deadline(deadline);
        Ok(())
    }
}

/// Receiving half of an in-memory stream
#[derive(Debug, Clone)]
pub struct MemRecvStream {
    id: StreamId,
    pipe: Arc<Pipe>,
}

impl MemRecvStream {
    pub(crate) fn new(id: StreamId, pipe: Arc<Pipe>) -> Self {
        Self { id, pipe }
    }

    /// Code the peer reset its sending side with, if it did
    pub fn reset_code(&self) -> Option<u64> {
        self.pipe.reset_code()
    }

    /// How many times the peer called cancel_write
    pub fn reset_count(&self) -> usize {
        self.pipe.reset_calls()
    }

    /// Whether the peer finished its sending side
    pub fn is_finished(&self) -> bool {
        self.pipe.is_finished()
    }
}

impl StreamHandle for MemRecvStream {
    fn stream_id(&self) -> StreamId {
        self.id
    }
}

#[async_trait]
impl RawRecvStream for MemRecvStream {
    async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.pipe.read(buf).await
    }

    fn cancel_read(&self, code: u64) {
        tracing::trace!("{} cancel_read({:#x})", self.id, code);
        self.pipe.stop_sending(code);
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) -> Result<(), TransportError> {
        self.pipe.set_read_deadline(deadline);
        Ok(())
    }
}

/// Bidirectional in-memory stream
///
/// Clones share the same pipes, so a test can keep one handle for
/// inspection while another is driven elsewhere.
#[derive(Debug, Clone)]
pub struct MemStream {
    send: MemSendStream,
    recv: MemRecvStream,
}

impl MemStream {
    pub(crate) fn new(send: MemSendStream, recv: MemRecvStream) -> Self {
        Self { send, recv }
    }

    /// Separate handles for the two directions
    pub fn split(&self) -> (MemSendStream, MemRecvStream) {
        (self.send.clone(), self.recv.clone())
    }

    /// See [`MemSendStream::stop_sending_code`]
    pub fn stop_sending_code(&self) -> Option<u64> {
        self.send.stop_sending_code()
    }

    /// See [`MemSendStream::stop_sending_count`]
    pub fn stop_sending_count(&self) -> usize {
        self.send.stop_sending_count()
    }

    /// See [`MemRecvStream::reset_code`]
    pub fn reset_code(&self) -> Option<u64> {
        self.recv.reset_code()
    }

    /// See [`MemRecvStream::reset_count`]
    pub fn reset_count(&self) -> usize {
        self.recv.reset_count()
    }
}

impl StreamHandle for MemStream {
    fn stream_id(&self) -> StreamId {
        self.send.id
    }
}

#[async_trait]
impl RawSendStream for MemStream {
    async fn write(&self, buf: &[u8]) -> Result<usize, TransportError> {
        self.send.write(buf).await
    }

    fn close(&self) -> Result<(), TransportError> {
        self.send.close()
    }

    fn cancel_write(&self, code: u64) {
        self.send.cancel_write(code)
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) -> Result<(), TransportError> {
        self.send.set_write_deadline(deadline)
    }
}

#[async_trait]
impl RawRecvStream for MemStream {
    async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.recv.read(buf).await
    }

    fn cancel_read(&self, code: u64) {
        self.recv.cancel_read(code)
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) -> Result<(), TransportError> {
        self.recv.set_read_deadline(deadline)
    }
}
