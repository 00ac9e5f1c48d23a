//! Sending side of a WebTransport stream

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::time::Instant;
use wtmux_core::{io, ConnectionError, MuxError, RawSendStream, StreamHandle, TransportError};
use wtmux_proto::error_code::{self, StreamErrorCode, SESSION_GONE_ERROR_CODE};
use wtmux_proto::StreamId;

use super::{translate_error, OnClose, SessionSlot};
use crate::streams_map::CloseFn;

/// Outgoing half of a stream
///
/// For locally opened streams the WebTransport header is written ahead of
/// the first payload byte (or at close, if nothing was written).
pub struct SendStream<S> {
    pub(crate) inner: Arc<S>,
    /// Header still to be written; taken by the first write or close
    header: Mutex<Option<Bytes>>,
    pub(crate) session: SessionSlot,
    on_close: OnClose,
}

impl<S: RawSendStream> SendStream<S> {
    pub(crate) fn new(
        inner: Arc<S>,
        header: Option<Bytes>,
        session: SessionSlot,
        on_close: OnClose,
    ) -> Self {
        Self {
            inner,
            header: Mutex::new(header),
            session,
            on_close,
        }
    }

    /// A unidirectional stream owned by nobody else
    pub(crate) fn standalone(
        raw: S,
        header: Option<Bytes>,
        on_close: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self::new(Arc::new(raw), header, SessionSlot::default(), Arc::new(on_close))
    }

    /// Transport stream ID
    pub fn stream_id(&self) -> StreamId {
        self.inner.stream_id()
    }

    /// Write bytes, returning how many were accepted
    pub async fn write(&self, buf: &[u8]) -> Result<usize, MuxError> {
        self.flush_header().await?;
        self.inner.write(buf).await.map_err(|err| self.fail(err))
    }

    /// Write the whole buffer
    pub async fn write_all(&self, mut buf: &[u8]) -> Result<(), MuxError> {
        while !buf.is_empty() {
            let n = self.write(buf).await?;
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Finish the stream gracefully
    pub async fn close(&self) -> Result<(), MuxError> {
        self.flush_header().await?;
        (self.on_close)();
        self.inner
            .close()
            .map_err(|err| translate_error(err, &self.session))
    }

    /// Abort sending with an application error code
    pub fn cancel_write(&self, code: StreamErrorCode) {
        (self.on_close)();
        self.inner.cancel_write(error_code::to_http_code(code));
    }

    /// Deadline for pending and future writes (`None` clears it)
    pub fn set_write_deadline(&self, deadline: Option<Instant>) -> Result<(), MuxError> {
        self.inner
            .set_write_deadline(deadline)
            .map_err(|err| translate_error(err, &self.session))
    }

    /// Callback the session uses to tear this stream down
    pub(crate) fn session_closer(&self) -> CloseFn {
        let inner = Arc::clone(&self.inner);
        let session = Arc::clone(&self.session);
        Box::new(move |err: &ConnectionError| {
            let _ = session.set(err.clone());
            inner.cancel_write(SESSION_GONE_ERROR_CODE);
        })
    }

    /// Write the pending header, once
    ///
    /// A failed flush is reported to the caller that triggered it and is
    /// not retried; unless it timed out, the stream is done.
    async fn flush_header(&self) -> Result<(), MuxError> {
        let mut header = self.header.lock().await;
        if let Some(bytes) = header.take() {
            io::write_all(&*self.inner, &bytes)
                .await
                .map_err(|err| self.fail(err))?;
        }
        Ok(())
    }

    fn fail(&self, err: TransportError) -> MuxError {
        if err != TransportError::Timeout {
            (self.on_close)();
        }
        translate_error(err, &self.session)
    }
}

impl<S: StreamHandle> fmt::Debug for SendStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendStream")
            .field("id", &self.inner.stream_id())
            .finish()
    }
}
