//! Receiving side of a WebTransport stream

use std::fmt;
use std::sync::Arc;

use tokio::time::Instant;
use wtmux_core::{ConnectionError, MuxError, RawRecvStream, StreamHandle, TransportError};
use wtmux_proto::error_code::{self, StreamErrorCode, SESSION_GONE_ERROR_CODE};
use wtmux_proto::StreamId;

use super::{translate_error, OnClose, SessionSlot};
use crate::streams_map::CloseFn;

/// Incoming half of a stream
pub struct ReceiveStream<S> {
    pub(crate) inner: Arc<S>,
    pub(crate) session: SessionSlot,
    on_close: OnClose,
}

impl<S: RawRecvStream> ReceiveStream<S> {
    pub(crate) fn new(inner: Arc<S>, session: SessionSlot, on_close: OnClose) -> Self {
        Self {
            inner,
            session,
            on_close,
        }
    }

    /// A unidirectional stream owned by nobody else
    pub(crate) fn standalone(raw: S, on_close: impl Fn() + Send + Sync + 'static) -> Self {
        Self::new(Arc::new(raw), SessionSlot::default(), Arc::new(on_close))
    }

    /// Transport stream ID
    pub fn stream_id(&self) -> StreamId {
        self.inner.stream_id()
    }

    /// Read bytes into `buf`; `Ok(0)` marks the end of the stream
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, MuxError> {
        match self.inner.read(buf).await {
            Ok(0) if !buf.is_empty() => {
                (self.on_close)();
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Read until the peer finishes the stream
    pub async fn read_to_end(&self) -> Result<Vec<u8>, MuxError> {
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match self.read(&mut buf).await? {
                0 => return Ok(out),
                n => out.extend_from_slice(&buf[..n]),
            }
        }
    }

    /// Ask the peer to stop sending, with an application error code
    pub fn cancel_read(&self, code: StreamErrorCode) {
        (self.on_close)();
        self.inner.cancel_read(error_code::to_http_code(code));
    }

    /// Deadline for pending and future reads (`None` clears it)
    pub fn set_read_deadline(&self, deadline: Option<Instant>) -> Result<(), MuxError> {
        self.inner
            .set_read_deadline(deadline)
            .map_err(|err| translate_error(err, &self.session))
    }

    pub(crate) fn session_closer(&self) -> CloseFn {
        let inner = Arc::clone(&self.inner);
        let session = Arc::clone(&self.session);
        Box::new(move |err: &ConnectionError| {
            let _ = session.set(err.clone());
            inner.cancel_read(SESSION_GONE_ERROR_CODE);
        })
    }

    fn fail(&self, err: TransportError) -> MuxError {
        if err != TransportError::Timeout {
            (self.on_close)();
        }
        translate_error(err, &self.session)
    }
}

impl<S: StreamHandle> fmt::Debug for ReceiveStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiveStream")
            .field("id", &self.inner.stream_id())
            .finish()
    }
}
