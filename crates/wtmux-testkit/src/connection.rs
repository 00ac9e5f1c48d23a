//! In-memory connection pair

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use wtmux_core::{Connection, ConnectionId, TransportError};
use wtmux_proto::StreamId;

use crate::pipe::Pipe;
use crate::stream::{MemRecvStream, MemSendStream, MemStream};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Which end of the pair opened the connection
///
/// Decides the low bit of stream IDs, as in QUIC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    fn id_bit(self) -> u64 {
        match self {
            Side::Client => 0,
            Side::Server => 1,
        }
    }
}

struct ConnInner {
    id: ConnectionId,
    side: Side,
    window: usize,
    closed: CancellationToken,

    /// Streams this side may still open; the peer raises them
    bidi_credit: Arc<Semaphore>,
    uni_credit: Arc<Semaphore>,
    next_bidi: AtomicU64,
    next_uni: AtomicU64,

    to_peer_bidi: mpsc::UnboundedSender<MemStream>,
    to_peer_uni: mpsc::UnboundedSender<MemRecvStream>,
    incoming_bidi: Mutex<mpsc::UnboundedReceiver<MemStream>>,
    incoming_uni: Mutex<mpsc::UnboundedReceiver<MemRecvStream>>,
}

/// One endpoint of an in-memory connection
#[derive(Clone)]
pub struct MemConnection {
    inner: Arc<ConnInner>,
}

impl MemConnection {
    /// Two connected endpoints with no stream limits
    pub fn pair() -> (Self, Self) {
        Self::builder().build()
    }

    /// Two connected endpoints with custom limits
    pub fn builder() -> PairBuilder {
        PairBuilder::default()
    }

    /// Which end this is
    pub fn side(&self) -> Side {
        self.inner.side
    }

    /// Next bidirectional stream opened by the peer
    ///
    /// Returns None once the connection is closed.
    pub async fn accept_stream(&self) -> Option<MemStream> {
        let mut rx = self.inner.incoming_bidi.lock().await;
        tokio::select! {
            stream = rx.recv() => stream,
            _ = self.inner.closed.cancelled() => None,
        }
    }

    /// Next unidirectional stream opened by the peer
    pub async fn accept_uni_stream(&self) -> Option<MemRecvStream> {
        let mut rx = self.inner.incoming_uni.lock().await;
        tokio::select! {
            stream = rx.recv() => stream,
            _ = self.inner.closed.cancelled() => None,
        }
    }

    /// Allow this side to open `n` more bidirectional streams
    pub fn grant_bidi_streams(&self, n: usize) {
        self.inner.bidi_credit.add_permits(n);
    }

    /// Allow this side to open `n` more unidirectional streams
    pub fn grant_uni_streams(&self, n: usize) {
        self.inner.uni_credit.add_permits(n);
    }

    /// Tear down the connection for both endpoints
    pub fn close(&self) {
        tracing::debug!("{} closed", self.inner.id);
        self.inner.closed.cancel();
    }

    fn check_open(&self) -> Result<(), TransportError> {
        if self.inner.closed.is_cancelled() {
            return Err(TransportError::ConnectionClosed("connection closed".to_string()));
        }
        Ok(())
    }

    fn pipe(&self) -> Arc<Pipe> {
        Arc::new(Pipe::new(self.inner.window, self.inner.closed.clone()))
    }

    fn create_bidi(&self) -> MemStream {
        let n = self.inner.next_bidi.fetch_add(1, Ordering::Relaxed);
        let id = StreamId::new(4 * n + self.inner.side.id_bit());
        let outbound = self.pipe();
        let inbound = self.pipe();

        let local = MemStream::new(
            MemSendStream::new(id, outbound.clone()),
            MemRecvStream::new(id, inbound.clone()),
        );
        let remote = MemStream::new(
            MemSendStream::new(id, inbound),
            MemRecvStream::new(id, outbound),
        );
        // Peer may already be gone; the stream then simply never arrives
        let _ = self.inner.to_peer_bidi.send(remote);
        local
    }

    fn create_uni(&self) -> MemSendStream {
        let n = self.inner.next_uni.fetch_add(1, Ordering::Relaxed);
        let id = StreamId::new(4 * n + 2 + self.inner.side.id_bit());
        let pipe = self.pipe();

        let _ = self.inner.to_peer_uni.send(MemRecvStream::new(id, pipe.clone()));
        MemSendStream::new(id, pipe)
    }

    async fn acquire(&self, credit: &Semaphore) -> Result<(), TransportError> {
        self.check_open()?;
        tokio::select! {
            permit = credit.acquire() => {
                let permit = permit.map_err(|_| {
                    TransportError::ConnectionClosed("stream credit closed".to_string())
                })?;
                permit.forget();
                Ok(())
            }
            _ = self.inner.closed.cancelled() => {
                Err(TransportError::ConnectionClosed("connection closed".to_string()))
            }
        }
    }

    fn try_acquire(&self, credit: &Semaphore) -> Result<(), TransportError> {
        self.check_open()?;
        let permit = credit
            .try_acquire()
            .map_err(|_| TransportError::StreamLimitReached)?;
        permit.forget();
        Ok(())
    }
}

#[async_trait]
impl Connection for MemConnection {
    type Stream = MemStream;
    type SendStream = MemSendStream;
    type RecvStream = MemRecvStream;

    fn id(&self) -> ConnectionId {
        self.inner.id
    }

    fn open_stream(&self) -> Result<MemStream, TransportError> {
        self.try_acquire(&self.inner.bidi_credit)?;
        Ok(self.create_bidi())
    }

    async fn open_stream_sync(&self) -> Result<MemStream, TransportError> {
        self.acquire(&self.inner.bidi_credit).await?;
        Ok(self.create_bidi())
    }

    fn open_uni_stream(&self) -> Result<MemSendStream, TransportError> {
        self.try_acquire(&self.inner.uni_credit)?;
        Ok(self.create_uni())
    }

    async fn open_uni_stream_sync(&self) -> Result<MemSendStream, TransportError> {
        self.acquire(&self.inner.uni_credit).await?;
        Ok(self.create_uni())
    }

    fn context(&self) -> CancellationToken {
        self.inner.closed.clone()
    }
}

/// Builder for a connected [`MemConnection`] pair
#[derive(Debug, Clone)]
pub struct PairBuilder {
    bidi_limit: usize,
    uni_limit: usize,
    window: usize,
}

impl Default for PairBuilder {
    fn default() -> Self {
        Self {
            bidi_limit: Semaphore::MAX_PERMITS,
            uni_limit: Semaphore::MAX_PERMITS,
            window: usize::MAX,
        }
    }
}

impl PairBuilder {
    /// Bidirectional streams each side may open before blocking
    pub fn bidi_limit(mut self, limit: usize) -> Self {
        self.bidi_limit = limit;
        self
    }

    /// Unidirectional streams each side may open before blocking
    pub fn uni_limit(mut self, limit: usize) -> Self {
        self.uni_limit = limit;
        self
    }

    /// Bytes a stream buffers before writes block
    pub fn window(mut self, window: usize) -> Self {
        self.window = window;
        self
    }

    /// Create the two endpoints
    pub fn build(self) -> (MemConnection, MemConnection) {
        let closed = CancellationToken::new();
        let (client_bidi_tx, server_bidi_rx) = mpsc::unbounded_channel();
        let (server_bidi_tx, client_bidi_rx) = mpsc::unbounded_channel();
        let (client_uni_tx, server_uni_rx) = mpsc::unbounded_channel();
        let (server_uni_tx, client_uni_rx) = mpsc::unbounded_channel();

        let client = self.endpoint(
            Side::Client,
            &closed,
            (client_bidi_tx, client_uni_tx),
            (client_bidi_rx, client_uni_rx),
        );
        let server = self.endpoint(
            Side::Server,
            &closed,
            (server_bidi_tx, server_uni_tx),
            (server_bidi_rx, server_uni_rx),
        );
        (client, server)
    }

    fn endpoint(
        &self,
        side: Side,
        closed: &CancellationToken,
        (to_peer_bidi, to_peer_uni): (
            mpsc::UnboundedSender<MemStream>,
            mpsc::UnboundedSender<MemRecvStream>,
        ),
        (incoming_bidi, incoming_uni): (
            mpsc::UnboundedReceiver<MemStream>,
            mpsc::UnboundedReceiver<MemRecvStream>,
        ),
    ) -> MemConnection {
        MemConnection {
            inner: Arc::new(ConnInner {
                id: ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)),
                side,
                window: self.window,
                closed: closed.clone(),
                bidi_credit: Arc::new(Semaphore::new(self.bidi_limit)),
                uni_credit: Arc::new(Semaphore::new(self.uni_limit)),
                next_bidi: AtomicU64::new(0),
                next_uni: AtomicU64::new(0),
                to_peer_bidi,
                to_peer_uni,
                incoming_bidi: Mutex::new(incoming_bidi),
                incoming_uni: Mutex::new(incoming_uni),
            }),
        }
    }
}
