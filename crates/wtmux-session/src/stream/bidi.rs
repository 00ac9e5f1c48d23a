//! Bidirectional WebTransport stream

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::Instant;
use wtmux_core::{ConnectionError, MuxError, RawStream, StreamHandle};
use wtmux_proto::error_code::{StreamErrorCode, SESSION_GONE_ERROR_CODE};
use wtmux_proto::StreamId;

use super::{OnClose, ReceiveStream, SendStream, SessionSlot};
use crate::streams_map::CloseFn;

#[derive(Debug, Clone, Copy)]
enum Half {
    Send,
    Receive,
}

#[derive(Debug, Default)]
struct Halves {
    send_done: bool,
    receive_done: bool,
    fired: bool,
}

/// Runs the teardown callback once both halves are done
struct HalfCloseTracker {
    halves: Mutex<Halves>,
    on_close: Box<dyn Fn() + Send + Sync>,
}

impl HalfCloseTracker {
    fn register_close(&self, half: Half) {
        let fire = {
            let mut halves = self.halves.lock();
            match half {
                Half::Send => halves.send_done = true,
                Half::Receive => halves.receive_done = true,
            }
            let fire = halves.send_done && halves.receive_done && !halves.fired;
            halves.fired |= fire;
            fire
        };

        if fire {
            (self.on_close)();
        }
    }
}

/// A bidirectional stream within a session
///
/// The two directions are independent: finishing the send side leaves the
/// receive side readable, and the stream only leaves its session once both
/// have ended.
pub struct Stream<S> {
    send: SendStream<S>,
    recv: ReceiveStream<S>,
}

impl<S: RawStream> Stream<S> {
    pub(crate) fn new(
        raw: S,
        header: Option<Bytes>,
        on_close: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        let inner = Arc::new(raw);
        let session = SessionSlot::default();
        let tracker = Arc::new(HalfCloseTracker {
            halves: Mutex::new(Halves::default()),
            on_close: Box::new(on_close),
        });

        let send_done: OnClose = {
            let tracker = Arc::clone(&tracker);
            Arc::new(move || tracker.register_close(Half::Send))
        };
        let receive_done: OnClose = Arc::new(move || tracker.register_close(Half::Receive));

        Self {
            send: SendStream::new(Arc::clone(&inner), header, Arc::clone(&session), send_done),
            recv: ReceiveStream::new(inner, session, receive_done),
        }
    }

    /// Transport stream ID
    pub fn stream_id(&self) -> StreamId {
        self.send.stream_id()
    }

    /// Write bytes, returning how many were accepted
    pub async fn write(&self, buf: &[u8]) -> Result<usize, MuxError> {
        self.send.write(buf).await
    }

    /// Write the whole buffer
    pub async fn write_all(&self, buf: &[u8]) -> Result<(), MuxError> {
        self.send.write_all(buf).await
    }

    /// Finish the send side
    pub async fn close(&self) -> Result<(), MuxError> {
        self.send.close().await
    }

    pub fn cancel_write(&self, code: StreamErrorCode) {
        self.send.cancel_write(code)
    }

    /// Read bytes into `buf`; `Ok(0)` marks the end of the stream
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, MuxError> {
        self.recv.read(buf).await
    }

    pub async fn read_to_end(&self) -> Result<Vec<u8>, MuxError> {
        self.recv.read_to_end().await
    }

    pub fn cancel_read(&self, code: StreamErrorCode) {
        self.recv.cancel_read(code)
    }

    /// Apply one deadline to both directions
    ///
    /// Both sides are always set. If both fail, the write side's error is
    /// the one returned.
    pub fn set_deadline(&self, deadline: Option<Instant>) -> Result<(), MuxError> {
        let write = self.send.set_write_deadline(deadline);
        let read = self.recv.set_read_deadline(deadline);
        write.and(read)
    }

    pub fn set_read_deadline(&self, deadline: Option<Instant>) -> Result<(), MuxError> {
        self.recv.set_read_deadline(deadline)
    }

    pub fn set_write_deadline(&self, deadline: Option<Instant>) -> Result<(), MuxError> {
        self.send.set_write_deadline(deadline)
    }

    /// Separate the two directions so they can be driven from different tasks
    pub fn split(self) -> (SendStream<S>, ReceiveStream<S>) {
        (self.send, self.recv)
    }

    pub(crate) fn session_closer(&self) -> CloseFn {
        let inner = Arc::clone(&self.send.inner);
        let session = Arc::clone(&self.send.session);
        Box::new(move |err: &ConnectionError| {
            let _ = session.set(err.clone());
            inner.cancel_write(SESSION_GONE_ERROR_CODE);
            inner.cancel_read(SESSION_GONE_ERROR_CODE);
        })
    }
}

impl<S: StreamHandle> fmt::Debug for Stream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.send.inner.stream_id())
            .finish()
    }
}
