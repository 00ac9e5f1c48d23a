//! WebTransport sessions
//!
//! A session lives on one transport connection and is identified by the ID
//! of its control stream. It hands out streams tagged with its ID, queues
//! streams the peer opened for it, and shuts all of them down together when
//! it closes.
//!
//! # Closing
//!
//! A session closes exactly once, for the first of these reasons:
//! - the application calls [`Session::close_with_error`]
//! - the peer sends a close capsule
//! - the control stream fails or finishes
//! - the connection goes away
//!
//! Every later operation reports that same [`ConnectionError`].

mod control;
mod pending;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use wtmux_core::config::MuxConfig;
use wtmux_core::{
    Connection, ConnectionError, MuxError, RawRecvStream, RawSendStream, StreamHandle,
    TransportError,
};
use wtmux_proto::error_code::{H3_NO_ERROR, SESSION_GONE_ERROR_CODE};
use wtmux_proto::{SessionErrorCode, SessionId, StreamHeader, StreamKind};

use crate::accept_queue::AcceptQueue;
use crate::stream::{ReceiveStream, SendStream, Stream};
use crate::streams_map::StreamsMap;

use pending::PendingOpens;

pub(crate) struct SessionInner<C: Connection> {
    id: SessionId,
    conn: Arc<C>,
    control: C::Stream,
    bidi_header: Bytes,
    uni_header: Bytes,

    /// Cancelled once teardown has finished
    ctx: CancellationToken,
    /// First close reason; set exactly once
    close_err: Mutex<Option<ConnectionError>>,
    pending: PendingOpens,

    bidi_queue: AcceptQueue<Stream<C::Stream>>,
    uni_queue: AcceptQueue<ReceiveStream<C::RecvStream>>,
    streams: Arc<StreamsMap>,
    backlog_warning: usize,
}

/// Handle to a WebTransport session
///
/// Cheap to clone; all clones refer to the same session.
pub struct Session<C: Connection> {
    inner: Arc<SessionInner<C>>,
}

impl<C: Connection> Clone for Session<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connection> Session<C> {
    /// Start a session on `conn` with an established control stream
    ///
    /// Spawns the task that watches the control stream, so this must be
    /// called from within a tokio runtime.
    pub(crate) fn new(
        id: SessionId,
        conn: Arc<C>,
        control: C::Stream,
        config: &MuxConfig,
    ) -> Result<Self, MuxError> {
        let inner = Arc::new(SessionInner {
            id,
            conn,
            control,
            bidi_header: StreamHeader::new(StreamKind::Bidirectional, id).to_bytes()?,
            uni_header: StreamHeader::new(StreamKind::Unidirectional, id).to_bytes()?,
            ctx: CancellationToken::new(),
            close_err: Mutex::new(None),
            pending: PendingOpens::default(),
            bidi_queue: AcceptQueue::new(),
            uni_queue: AcceptQueue::new(),
            streams: Arc::new(StreamsMap::new()),
            backlog_warning: config.accept_backlog_warning,
        });

        tokio::spawn(control::run(Arc::clone(&inner), config.max_capsule_size));
        tracing::debug!("{} started on {}", id, inner.conn.id());

        Ok(Self { inner })
    }

    /// Session ID (the ID of the control stream)
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// Connection the session runs on
    pub fn connection(&self) -> &Arc<C> {
        &self.inner.conn
    }

    /// Token cancelled once the session has closed and torn down its streams
    pub fn context(&self) -> CancellationToken {
        self.inner.ctx.child_token()
    }

    /// Wait for the session to close and return the reason
    pub async fn closed(&self) -> ConnectionError {
        self.inner.ctx.cancelled().await;
        self.inner.close_reason()
    }

    /// Close reason, if the session is closing or closed
    pub fn close_error(&self) -> Option<ConnectionError> {
        self.inner.close_err.lock().clone()
    }

    /// Wait for the next bidirectional stream opened by the peer
    pub async fn accept_stream(&self) -> Result<Stream<C::Stream>, MuxError> {
        self.inner.accept(&self.inner.bidi_queue).await
    }

    /// Wait for the next unidirectional stream opened by the peer
    pub async fn accept_uni_stream(&self) -> Result<ReceiveStream<C::RecvStream>, MuxError> {
        self.inner.accept(&self.inner.uni_queue).await
    }

    /// Open a bidirectional stream without waiting for stream credit
    pub fn open_stream(&self) -> Result<Stream<C::Stream>, MuxError> {
        let state = self.inner.close_err.lock();
        if let Some(err) = state.as_ref() {
            return Err(err.clone().into());
        }
        let raw = self.inner.conn.open_stream()?;
        Ok(self.inner.track_stream(raw, Some(self.inner.bidi_header.clone())))
    }

    /// Open a bidirectional stream, waiting for stream credit if needed
    ///
    /// Returns the session's close reason if the session closes while
    /// waiting. Dropping the future abandons the open.
    pub async fn open_stream_sync(&self) -> Result<Stream<C::Stream>, MuxError> {
        let inner = &self.inner;
        inner
            .open_sync(
                inner.conn.open_stream_sync(),
                |raw| {
                    raw.cancel_write(SESSION_GONE_ERROR_CODE);
                    raw.cancel_read(SESSION_GONE_ERROR_CODE);
                },
                |raw| inner.track_stream(raw, Some(inner.bidi_header.clone())),
            )
            .await
    }

    /// Open a unidirectional stream without waiting for stream credit
    pub fn open_uni_stream(&self) -> Result<SendStream<C::SendStream>, MuxError> {
        let state = self.inner.close_err.lock();
        if let Some(err) = state.as_ref() {
            return Err(err.clone().into());
        }
        let raw = self.inner.conn.open_uni_stream()?;
        Ok(self.inner.track_send_stream(raw))
    }

    /// Open a unidirectional stream, waiting for stream credit if needed
    pub async fn open_uni_stream_sync(&self) -> Result<SendStream<C::SendStream>, MuxError> {
        let inner = &self.inner;
        inner
            .open_sync(
                inner.conn.open_uni_stream_sync(),
                |raw| raw.cancel_write(SESSION_GONE_ERROR_CODE),
                |raw| inner.track_send_stream(raw),
            )
            .await
    }

    /// Close the session with an application error code and message
    ///
    /// Sends a close capsule to the peer and waits until every stream of the
    /// session has been torn down. Only the first close does anything; later
    /// calls return immediately. Messages longer than 1024 bytes are
    /// truncated on the wire.
    pub async fn close_with_error(
        &self,
        error_code: SessionErrorCode,
        message: &str,
    ) -> Result<(), MuxError> {
        let inner = &self.inner;
        {
            let mut state = inner.close_err.lock();
            if state.is_some() {
                return Ok(());
            }
            *state = Some(ConnectionError::local(error_code, message));
        }

        tracing::info!("{} closing (code {})", inner.id, error_code);
        let sent = control::send_close(&inner.control, error_code, message).await;
        inner.control.cancel_read(H3_NO_ERROR);
        let finished = inner.control.close();

        inner.ctx.cancelled().await;
        sent?;
        finished.map_err(MuxError::from)
    }

    /// Queue a bidirectional stream the peer opened for this session
    pub(crate) fn add_incoming_stream(&self, raw: C::Stream) {
        let stream = {
            let state = self.inner.close_err.lock();
            if state.is_some() {
                drop(state);
                tracing::debug!("{}: rejecting {} after close", self.inner.id, raw.stream_id());
                raw.cancel_write(SESSION_GONE_ERROR_CODE);
                raw.cancel_read(SESSION_GONE_ERROR_CODE);
                return;
            }
            self.inner.track_stream(raw, None)
        };

        let depth = self.inner.bidi_queue.add(stream);
        self.inner.check_backlog("bidirectional", depth);
    }

    /// Queue a unidirectional stream the peer opened for this session
    pub(crate) fn add_incoming_uni_stream(&self, raw: C::RecvStream) {
        let stream = {
            let state = self.inner.close_err.lock();
            if state.is_some() {
                drop(state);
                tracing::debug!("{}: rejecting {} after close", self.inner.id, raw.stream_id());
                raw.cancel_read(SESSION_GONE_ERROR_CODE);
                return;
            }
            self.inner.track_recv_stream(raw)
        };

        let depth = self.inner.uni_queue.add(stream);
        self.inner.check_backlog("unidirectional", depth);
    }
}

impl<C: Connection> SessionInner<C> {
    fn close_reason(&self) -> ConnectionError {
        self.close_err
            .lock()
            .clone()
            .unwrap_or_else(ConnectionError::remote_unspecified)
    }

    async fn accept<T>(&self, queue: &AcceptQueue<T>) -> Result<T, MuxError> {
        if let Some(err) = self.close_err.lock().clone() {
            return Err(err.into());
        }

        loop {
            if let Some(item) = queue.next() {
                return Ok(item);
            }
            tokio::select! {
                _ = queue.notified() => {}
                _ = self.ctx.cancelled() => return Err(self.close_reason().into()),
            }
        }
    }

    /// Shared path of the blocking opens
    ///
    /// The open is registered so that closing the session can interrupt it.
    /// A stream that arrives after the session closed is reset with
    /// `reset` instead of being handed out.
    async fn open_sync<R, T>(
        &self,
        open: impl Future<Output = Result<R, TransportError>>,
        reset: impl FnOnce(&R),
        track: impl FnOnce(R) -> T,
    ) -> Result<T, MuxError> {
        let registration = {
            let state = self.close_err.lock();
            if let Some(err) = state.as_ref() {
                return Err(err.clone().into());
            }
            self.pending.register()
        };

        let opened = tokio::select! {
            opened = open => opened,
            _ = registration.token().cancelled() => return Err(self.close_reason().into()),
        };

        let state = self.close_err.lock();
        drop(registration);
        if let Some(err) = state.as_ref() {
            let err = err.clone();
            drop(state);
            if let Ok(raw) = &opened {
                reset(raw);
            }
            return Err(err.into());
        }
        let raw = opened?;
        Ok(track(raw))
    }

    /// Wrap and register a bidirectional stream; caller holds `close_err`
    fn track_stream(&self, raw: C::Stream, header: Option<Bytes>) -> Stream<C::Stream> {
        let id = raw.stream_id();
        let streams = Arc::clone(&self.streams);
        let stream = Stream::new(raw, header, move || streams.remove_stream(id));
        self.streams.add_stream(id, stream.session_closer());
        stream
    }

    /// Wrap and register an outgoing unidirectional stream; caller holds `close_err`
    fn track_send_stream(&self, raw: C::SendStream) -> SendStream<C::SendStream> {
        let id = raw.stream_id();
        let streams = Arc::clone(&self.streams);
        let stream = SendStream::standalone(raw, Some(self.uni_header.clone()), move || {
            streams.remove_stream(id)
        });
        self.streams.add_stream(id, stream.session_closer());
        stream
    }

    /// Wrap and register an incoming unidirectional stream; caller holds `close_err`
    fn track_recv_stream(&self, raw: C::RecvStream) -> ReceiveStream<C::RecvStream> {
        let id = raw.stream_id();
        let streams = Arc::clone(&self.streams);
        let stream = ReceiveStream::standalone(raw, move || streams.remove_stream(id));
        self.streams.add_stream(id, stream.session_closer());
        stream
    }

    fn check_backlog(&self, kind: &str, depth: usize) {
        if depth == self.backlog_warning {
            tracing::warn!(
                "{}: {} {} streams waiting to be accepted",
                self.id,
                depth,
                kind
            );
        }
    }

    /// Record the close reason (unless one is already set), interrupt
    /// blocking opens, tear down every stream, then release waiters
    fn shutdown(&self, reason: ConnectionError) {
        let reason = {
            let mut state = self.close_err.lock();
            let reason = state.get_or_insert(reason).clone();
            self.pending.cancel_all();
            self.streams.close_session(&reason);
            reason
        };

        tracing::info!("{} closed: {}", self.id, reason);
        self.ctx.cancel();
    }
}

impl<C: Connection> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("connection", &self.inner.conn.id())
            .field("pending_opens", &self.inner.pending.len())
            .field("closed", &self.inner.ctx.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use bytes::BytesMut;
    use tokio_util::codec::Encoder;
    use wtmux_core::io;
    use wtmux_proto::{Capsule, CapsuleCodec, CloseSession};
    use wtmux_testkit::{MemConnection, MemStream};

    /// Client-side session plus the server's end of its control stream
    async fn client_session(
        client: &MemConnection,
        server: &MemConnection,
    ) -> (Session<MemConnection>, MemStream) {
        let control = client.open_stream().unwrap();
        let id = SessionId::from(control.stream_id());
        let session =
            Session::new(id, Arc::new(client.clone()), control, &MuxConfig::default()).unwrap();
        let peer_control = server.accept_stream().await.unwrap();
        (session, peer_control)
    }

    async fn read_all(stream: &MemStream) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                return out;
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    #[tokio::test]
    async fn test_open_stream_writes_header() {
        let (client, server) = MemConnection::pair();
        let (session, _control) = client_session(&client, &server).await;

        let stream = session.open_stream().unwrap();
        stream.write_all(b"hi").await.unwrap();
        stream.close().await.unwrap();

        let peer = server.accept_stream().await.unwrap();
        assert_eq!(read_all(&peer).await, [0x40, 0x41, 0x00, b'h', b'i']);
    }

    #[tokio::test]
    async fn test_open_uni_stream_writes_header() {
        let (client, server) = MemConnection::pair();
        let (session, _control) = client_session(&client, &server).await;

        let stream = session.open_uni_stream_sync().await.unwrap();
        stream.close().await.unwrap();

        let peer = server.accept_uni_stream().await.unwrap();
        let mut buf = [0u8; 8];
        let n = peer.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0x40, 0x54, 0x00]);
    }

    #[tokio::test]
    async fn test_close_with_error_sends_capsule() {
        let (client, server) = MemConnection::pair();
        let (session, peer_control) = client_session(&client, &server).await;

        session.close_with_error(42, "bye").await.unwrap();

        assert_eq!(
            read_all(&peer_control).await,
            [0x68, 0x43, 0x07, 0x00, 0x00, 0x00, 0x2a, b'b', b'y', b'e']
        );
        assert_eq!(peer_control.stop_sending_code(), Some(H3_NO_ERROR));
        assert_eq!(session.close_error(), Some(ConnectionError::local(42, "bye")));
        assert!(session.context().is_cancelled());
    }

    #[tokio::test]
    async fn test_second_close_is_noop() {
        let (client, server) = MemConnection::pair();
        let (session, _control) = client_session(&client, &server).await;

        session.close_with_error(1, "first").await.unwrap();
        session.close_with_error(2, "second").await.unwrap();
        assert_eq!(session.close_error(), Some(ConnectionError::local(1, "first")));
    }

    #[tokio::test]
    async fn test_peer_close_capsule() {
        let (client, server) = MemConnection::pair();
        let (session, peer_control) = client_session(&client, &server).await;

        let mut buf = BytesMut::new();
        CapsuleCodec::new()
            .encode(CloseSession::new(7, "done").to_capsule(), &mut buf)
            .unwrap();
        io::write_all(&peer_control, &buf).await.unwrap();

        assert_eq!(session.closed().await, ConnectionError::remote(7, "done"));
        let err = session.open_stream().unwrap_err();
        assert_eq!(err.as_session_close(), Some(&ConnectionError::remote(7, "done")));
        let err = session.accept_uni_stream().await.unwrap_err();
        assert_eq!(err.as_session_close(), Some(&ConnectionError::remote(7, "done")));
    }

    #[tokio::test]
    async fn test_large_unknown_capsule_keeps_session_open() {
        let (client, server) = MemConnection::pair();
        let (session, peer_control) = client_session(&client, &server).await;

        let mut codec = CapsuleCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(Capsule::new(0x3f, Bytes::from(vec![0u8; 70_000])), &mut buf)
            .unwrap();
        io::write_all(&peer_control, &buf).await.unwrap();

        let closed = tokio::time::timeout(Duration::from_millis(100), session.closed()).await;
        assert!(closed.is_err());
        assert!(session.close_error().is_none());

        let mut buf = BytesMut::new();
        codec
            .encode(CloseSession::new(7, "done").to_capsule(), &mut buf)
            .unwrap();
        io::write_all(&peer_control, &buf).await.unwrap();
        assert_eq!(session.closed().await, ConnectionError::remote(7, "done"));
    }

    #[tokio::test]
    async fn test_connection_loss_closes_session() {
        let (client, server) = MemConnection::pair();
        let (session, _control) = client_session(&client, &server).await;

        let accept = {
            let session = session.clone();
            tokio::spawn(async move { session.accept_stream().await })
        };
        client.close();

        let err = accept.await.unwrap().unwrap_err();
        assert_eq!(err.as_session_close(), Some(&ConnectionError::remote_unspecified()));
    }

    #[tokio::test]
    async fn test_close_resets_open_streams() {
        let (client, server) = MemConnection::pair();
        let (session, _control) = client_session(&client, &server).await;

        let stream = session.open_stream().unwrap();
        stream.write_all(b"x").await.unwrap();
        let peer = server.accept_stream().await.unwrap();

        session.close_with_error(0, "").await.unwrap();

        assert_eq!(peer.reset_code(), Some(SESSION_GONE_ERROR_CODE));
        assert_eq!(peer.stop_sending_code(), Some(SESSION_GONE_ERROR_CODE));
        let mut buf = [0u8; 4];
        let err = stream.read(&mut buf).await.unwrap_err();
        assert_eq!(err.as_session_close(), Some(&ConnectionError::local(0, "")));
    }

    #[tokio::test]
    async fn test_incoming_stream_after_close_is_rejected() {
        let (client, server) = MemConnection::pair();
        let (session, _control) = client_session(&client, &server).await;
        session.close_with_error(0, "").await.unwrap();

        let remote = server.open_stream().unwrap();
        session.add_incoming_stream(client.accept_stream().await.unwrap());

        assert_eq!(remote.reset_code(), Some(SESSION_GONE_ERROR_CODE));
        assert_eq!(remote.stop_sending_code(), Some(SESSION_GONE_ERROR_CODE));
    }

    #[tokio::test]
    async fn test_incoming_streams_accepted_in_order() {
        let (client, server) = MemConnection::pair();
        let (session, _control) = client_session(&client, &server).await;

        for _ in 0..3 {
            server.open_stream().unwrap();
            session.add_incoming_stream(client.accept_stream().await.unwrap());
        }

        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(session.accept_stream().await.unwrap().stream_id().as_u64());
        }
        assert_eq!(ids, vec![1, 5, 9]);
    }
}
