//! Routing of incoming streams to their sessions
//!
//! Streams may reach us before the request that establishes their session
//! has been processed. Such a stream waits (bounded by the configured
//! reordering timeout) for its session to appear and is reset with
//! [`BUFFERED_STREAM_REJECTED_ERROR_CODE`] if it never does.
//!
//! # Entries
//!
//! Sessions are tracked per connection. An entry exists either because the
//! session was created or because streams are waiting for it. Waiters share
//! the entry's establishment signal and keep a count on the entry; the last
//! waiter to give up on a never-established session removes the entry, so a
//! session created later with the same ID starts fresh. An established
//! session's entry is removed once the session closes.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use wtmux_core::config::MuxConfig;
use wtmux_core::{
    io, Connection, ConnectionId, MuxError, RawRecvStream, RawSendStream, StreamHandle,
};
use wtmux_proto::error_code::{BUFFERED_STREAM_REJECTED_ERROR_CODE, H3_GENERAL_PROTOCOL_ERROR};
use wtmux_proto::{SessionId, StreamId};

use crate::session::Session;

/// Signal raised once a session is created, carrying the session
struct Establishment<C: Connection> {
    done: CancellationToken,
    session: OnceLock<Session<C>>,
}

impl<C: Connection> Establishment<C> {
    fn pending() -> Arc<Self> {
        Arc::new(Self {
            done: CancellationToken::new(),
            session: OnceLock::new(),
        })
    }

    /// Install the session and wake every waiter; registry lock held
    fn establish(&self, session: Session<C>) {
        let _ = self.session.set(session);
        self.done.cancel();
    }
}

struct SessionEntry<C: Connection> {
    establishment: Arc<Establishment<C>>,
    /// Streams currently parked on this entry
    waiters: usize,
}

impl<C: Connection> SessionEntry<C> {
    fn session(&self) -> Option<&Session<C>> {
        self.establishment.session.get()
    }
}

/// A raw stream the peer opened, before it is bound to a session
enum Incoming<C: Connection> {
    Bidi(C::Stream),
    Uni(C::RecvStream),
}

impl<C: Connection> Incoming<C> {
    fn stream_id(&self) -> StreamId {
        match self {
            Incoming::Bidi(stream) => stream.stream_id(),
            Incoming::Uni(stream) => stream.stream_id(),
        }
    }

    fn deliver(self, session: &Session<C>) {
        match self {
            Incoming::Bidi(stream) => session.add_incoming_stream(stream),
            Incoming::Uni(stream) => session.add_incoming_uni_stream(stream),
        }
    }

    fn reject(self, code: u64) {
        match self {
            Incoming::Bidi(stream) => {
                stream.cancel_write(code);
                stream.cancel_read(code);
            }
            Incoming::Uni(stream) => stream.cancel_read(code),
        }
    }
}

type SessionMap<C> = HashMap<ConnectionId, HashMap<SessionId, SessionEntry<C>>>;

struct RegistryInner<C: Connection> {
    config: MuxConfig,
    sessions: Mutex<SessionMap<C>>,
    shutdown: CancellationToken,
    waiters: TaskTracker,
}

/// Maps incoming streams on every connection to their sessions
///
/// Cheap to clone; clones share state.
pub struct SessionRegistry<C: Connection> {
    inner: Arc<RegistryInner<C>>,
}

impl<C: Connection> Clone for SessionRegistry<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connection> SessionRegistry<C> {
    /// Create a registry
    pub fn new(config: MuxConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                sessions: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                waiters: TaskTracker::new(),
            }),
        }
    }

    /// Configuration sessions are created with
    pub fn config(&self) -> &MuxConfig {
        &self.inner.config
    }

    /// Create the session established by `control` and hand it any streams
    /// already waiting for it
    ///
    /// Replaces an earlier session registered under the same ID.
    pub fn create_session(
        &self,
        conn: Arc<C>,
        session_id: SessionId,
        control: C::Stream,
    ) -> Result<Session<C>, MuxError> {
        let conn_id = conn.id();
        let session = Session::new(session_id, conn, control, &self.inner.config)?;

        let (woke, establishment) = {
            let mut sessions = self.inner.sessions.lock();
            let entries = sessions.entry(conn_id).or_default();
            match entries.get(&session_id) {
                Some(entry) if entry.session().is_none() => {
                    entry.establishment.establish(session.clone());
                    (entry.waiters, Arc::downgrade(&entry.establishment))
                }
                _ => {
                    let establishment = Establishment::pending();
                    establishment.establish(session.clone());
                    let weak = Arc::downgrade(&establishment);
                    entries.insert(
                        session_id,
                        SessionEntry {
                            establishment,
                            waiters: 0,
                        },
                    );
                    (0, weak)
                }
            }
        };
        self.forget_when_closed(conn_id, session_id, &session, establishment);

        tracing::info!(
            session_id = %session_id,
            connection = %conn_id,
            buffered = woke,
            "Session established"
        );
        Ok(session)
    }

    /// Route a bidirectional stream whose header named `session_id`
    pub fn register_incoming_bidi_stream(
        &self,
        conn: &C,
        stream: C::Stream,
        session_id: SessionId,
    ) {
        self.dispatch(conn.id(), session_id, Incoming::Bidi(stream));
    }

    /// Route a unidirectional stream
    ///
    /// The session ID is read off the front of the stream first; a stream
    /// whose ID cannot be read is reset with H3_GENERAL_PROTOCOL_ERROR.
    pub async fn register_incoming_uni_stream(&self, conn: &C, stream: C::RecvStream) {
        let session_id = match io::read_varint(&stream).await {
            Ok(id) => SessionId::new(id),
            Err(err) => {
                tracing::warn!(
                    stream_id = %stream.stream_id(),
                    "Failed to read session ID from unidirectional stream: {}",
                    err
                );
                stream.cancel_read(H3_GENERAL_PROTOCOL_ERROR);
                return;
            }
        };
        self.dispatch(conn.id(), session_id, Incoming::Uni(stream));
    }

    /// Established session by connection and ID
    pub fn session(&self, conn: ConnectionId, session_id: SessionId) -> Option<Session<C>> {
        let sessions = self.inner.sessions.lock();
        sessions.get(&conn)?.get(&session_id)?.session().cloned()
    }

    /// Forget every session of a connection that has gone away
    ///
    /// Streams still waiting on that connection time out as usual.
    pub fn remove_connection(&self, conn: ConnectionId) {
        if let Some(entries) = self.inner.sessions.lock().remove(&conn) {
            tracing::debug!("Removed {} session entries for {}", entries.len(), conn);
        }
    }

    /// Number of streams waiting for their session
    pub fn pending_streams(&self) -> usize {
        self.inner
            .sessions
            .lock()
            .values()
            .flat_map(HashMap::values)
            .map(|entry| entry.waiters)
            .sum()
    }

    /// Release every waiting stream and wait for the waiters to exit
    ///
    /// Waiting streams are dropped without a reset. Established sessions are
    /// left running.
    pub async fn close(&self) {
        self.inner.shutdown.cancel();
        self.inner.waiters.close();
        self.inner.waiters.wait().await;
        tracing::debug!("Session registry closed");
    }

    /// Remove the session's entry once the session closes
    fn forget_when_closed(
        &self,
        conn_id: ConnectionId,
        session_id: SessionId,
        session: &Session<C>,
        establishment: Weak<Establishment<C>>,
    ) {
        let closed = session.context();
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            closed.cancelled().await;
            if let Some(inner) = inner.upgrade() {
                inner.forget_session(conn_id, session_id, &establishment);
            }
        });
    }

    fn dispatch(&self, conn_id: ConnectionId, session_id: SessionId, incoming: Incoming<C>) {
        let establishment = {
            let mut sessions = self.inner.sessions.lock();
            let entry = sessions
                .entry(conn_id)
                .or_default()
                .entry(session_id)
                .or_insert_with(|| SessionEntry {
                    establishment: Establishment::pending(),
                    waiters: 0,
                });

            match entry.session() {
                Some(session) => Err(session.clone()),
                None => {
                    entry.waiters += 1;
                    Ok(Arc::clone(&entry.establishment))
                }
            }
        };

        let establishment = match establishment {
            Ok(establishment) => establishment,
            Err(session) => {
                incoming.deliver(&session);
                return;
            }
        };

        tracing::debug!(
            session_id = %session_id,
            stream_id = %incoming.stream_id(),
            "Buffering stream until its session is established"
        );
        let inner = Arc::clone(&self.inner);
        self.inner.waiters.spawn(async move {
            inner
                .wait_for_session(conn_id, session_id, establishment, incoming)
                .await;
        });
    }
}

impl<C: Connection> RegistryInner<C> {
    async fn wait_for_session(
        &self,
        conn_id: ConnectionId,
        session_id: SessionId,
        establishment: Arc<Establishment<C>>,
        incoming: Incoming<C>,
    ) {
        tokio::select! {
            biased;

            _ = establishment.done.cancelled() => match establishment.session.get() {
                Some(session) => incoming.deliver(session),
                None => incoming.reject(BUFFERED_STREAM_REJECTED_ERROR_CODE),
            },
            _ = tokio::time::sleep(self.config.stream_reordering_timeout) => {
                tracing::warn!(
                    session_id = %session_id,
                    stream_id = %incoming.stream_id(),
                    code = BUFFERED_STREAM_REJECTED_ERROR_CODE,
                    "Session not established in time, rejecting stream"
                );
                incoming.reject(BUFFERED_STREAM_REJECTED_ERROR_CODE);
            }
            _ = self.shutdown.cancelled() => {}
        }

        self.release_waiter(conn_id, session_id, &establishment);
    }

    fn forget_session(
        &self,
        conn_id: ConnectionId,
        session_id: SessionId,
        establishment: &Weak<Establishment<C>>,
    ) {
        let mut sessions = self.sessions.lock();
        let Some(entries) = sessions.get_mut(&conn_id) else {
            return;
        };
        // A newer session may own the ID by now
        let current = entries
            .get(&session_id)
            .is_some_and(|entry| Arc::as_ptr(&entry.establishment) == establishment.as_ptr());
        if !current {
            return;
        }

        entries.remove(&session_id);
        if entries.is_empty() {
            sessions.remove(&conn_id);
        }
        tracing::debug!(
            session_id = %session_id,
            connection = %conn_id,
            "Closed session forgotten"
        );
    }

    fn release_waiter(
        &self,
        conn_id: ConnectionId,
        session_id: SessionId,
        establishment: &Arc<Establishment<C>>,
    ) {
        let mut sessions = self.sessions.lock();
        let Some(entries) = sessions.get_mut(&conn_id) else {
            return;
        };
        let Some(entry) = entries.get_mut(&session_id) else {
            return;
        };
        // The entry may have been replaced while we waited
        if !Arc::ptr_eq(&entry.establishment, establishment) {
            return;
        }

        entry.waiters -= 1;
        if entry.waiters == 0 && entry.session().is_none() {
            entries.remove(&session_id);
            if entries.is_empty() {
                sessions.remove(&conn_id);
            }
        }
    }
}

impl<C: Connection> Default for SessionRegistry<C> {
    fn default() -> Self {
        Self::new(MuxConfig::default())
    }
}

impl<C: Connection> fmt::Debug for SessionRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("config", &self.inner.config)
            .field("pending_streams", &self.pending_streams())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wtmux_proto::varint;
    use wtmux_testkit::{MemConnection, MemStream};

    fn registry(timeout: Duration) -> SessionRegistry<MemConnection> {
        SessionRegistry::new(MuxConfig {
            stream_reordering_timeout: timeout,
            ..MuxConfig::default()
        })
    }

    /// Register a server-side session for a fresh client control stream
    async fn establish(
        registry: &SessionRegistry<MemConnection>,
        client: &MemConnection,
        server: &MemConnection,
        session_id: SessionId,
    ) -> (Session<MemConnection>, MemStream) {
        let control = client.open_stream().unwrap();
        let raw = server.accept_stream().await.unwrap();
        let session = registry
            .create_session(Arc::new(server.clone()), session_id, raw)
            .unwrap();
        (session, control)
    }

    #[tokio::test]
    async fn test_stream_for_established_session_is_dispatched() {
        let (client, server) = MemConnection::pair();
        let registry = registry(Duration::from_secs(5));
        let (session, _control) = establish(&registry, &client, &server, SessionId::new(0)).await;

        let remote = client.open_stream().unwrap();
        let raw = server.accept_stream().await.unwrap();
        registry.register_incoming_bidi_stream(&server, raw, SessionId::new(0));
        assert_eq!(registry.pending_streams(), 0);

        let stream = session.accept_stream().await.unwrap();
        assert_eq!(stream.stream_id(), remote.stream_id());
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffered_stream_rejected_after_timeout() {
        let (client, server) = MemConnection::pair();
        let registry = registry(Duration::from_secs(1));

        let remote = client.open_stream().unwrap();
        let raw = server.accept_stream().await.unwrap();
        registry.register_incoming_bidi_stream(&server, raw, SessionId::new(8));
        assert_eq!(registry.pending_streams(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(remote.reset_code(), Some(BUFFERED_STREAM_REJECTED_ERROR_CODE));
        assert_eq!(remote.stop_sending_code(), Some(BUFFERED_STREAM_REJECTED_ERROR_CODE));
        assert_eq!(remote.reset_count(), 1);
        assert_eq!(registry.pending_streams(), 0);
        assert!(registry.inner.sessions.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_uni_stream_only_stops_reading() {
        let (client, server) = MemConnection::pair();
        let registry = registry(Duration::from_millis(100));

        let sender = client.open_uni_stream().unwrap();
        let mut header = bytes::BytesMut::new();
        varint::encode(12, &mut header).unwrap();
        io::write_all(&sender, &header).await.unwrap();

        registry
            .register_incoming_uni_stream(&server, server.accept_uni_stream().await.unwrap())
            .await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(sender.stop_sending_code(), Some(BUFFERED_STREAM_REJECTED_ERROR_CODE));
        assert_eq!(sender.stop_sending_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_session_starts_fresh() {
        let (client, server) = MemConnection::pair();
        let registry = registry(Duration::from_secs(1));

        let remote = client.open_stream().unwrap();
        let raw = server.accept_stream().await.unwrap();
        registry.register_incoming_bidi_stream(&server, raw, SessionId::new(8));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(remote.reset_code().is_some());

        let (session, _control) = establish(&registry, &client, &server, SessionId::new(8)).await;
        let accepted = tokio::time::timeout(Duration::from_secs(1), session.accept_stream()).await;
        assert!(accepted.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_drops_waiters_silently() {
        let (client, server) = MemConnection::pair();
        let registry = registry(Duration::from_secs(5));

        let remote = client.open_stream().unwrap();
        let raw = server.accept_stream().await.unwrap();
        registry.register_incoming_bidi_stream(&server, raw, SessionId::new(4));
        assert_eq!(registry.pending_streams(), 1);

        registry.close().await;

        assert_eq!(registry.pending_streams(), 0);
        assert_eq!(remote.reset_code(), None);
        assert_eq!(remote.stop_sending_code(), None);
    }

    #[tokio::test]
    async fn test_close_leaves_sessions_running() {
        let (client, server) = MemConnection::pair();
        let registry = registry(Duration::from_secs(5));
        let (session, _control) = establish(&registry, &client, &server, SessionId::new(0)).await;

        registry.close().await;
        assert!(session.close_error().is_none());
        assert!(session.open_stream().is_ok());
    }

    #[tokio::test]
    async fn test_unreadable_uni_session_id_resets_stream() {
        let (client, server) = MemConnection::pair();
        let registry = registry(Duration::from_secs(5));

        // First byte announces a two-byte varint, then the stream ends
        let sender = client.open_uni_stream().unwrap();
        io::write_all(&sender, &[0x40]).await.unwrap();
        sender.close().unwrap();

        registry
            .register_incoming_uni_stream(&server, server.accept_uni_stream().await.unwrap())
            .await;

        assert_eq!(sender.stop_sending_code(), Some(H3_GENERAL_PROTOCOL_ERROR));
        assert_eq!(registry.pending_streams(), 0);
    }

    #[tokio::test]
    async fn test_session_lookup_and_remove_connection() {
        let (client, server) = MemConnection::pair();
        let registry = registry(Duration::from_secs(5));
        let (session, _control) = establish(&registry, &client, &server, SessionId::new(0)).await;

        let found = registry.session(server.id(), SessionId::new(0)).unwrap();
        assert_eq!(found.id(), session.id());
        assert!(registry.session(server.id(), SessionId::new(4)).is_none());
        assert!(registry.session(client.id(), SessionId::new(0)).is_none());

        registry.remove_connection(server.id());
        assert!(registry.session(server.id(), SessionId::new(0)).is_none());
    }

    #[tokio::test]
    async fn test_closed_session_is_forgotten() {
        let (client, server) = MemConnection::pair();
        let registry = registry(Duration::from_secs(5));
        let (session, _control) = establish(&registry, &client, &server, SessionId::new(0)).await;
        let (_other, _other_control) =
            establish(&registry, &client, &server, SessionId::new(4)).await;

        session.close_with_error(0, "").await.unwrap();

        let forgotten = tokio::time::timeout(Duration::from_secs(1), async {
            while registry.session(server.id(), SessionId::new(0)).is_some() {
                tokio::task::yield_now().await;
            }
        })
        .await;
        assert!(forgotten.is_ok());
        assert!(registry.session(server.id(), SessionId::new(4)).is_some());
    }

    #[tokio::test]
    async fn test_replaced_session_entry_survives_old_close() {
        let (client, server) = MemConnection::pair();
        let registry = registry(Duration::from_secs(5));
        let (old, _old_control) = establish(&registry, &client, &server, SessionId::new(0)).await;
        let (new, _new_control) = establish(&registry, &client, &server, SessionId::new(0)).await;

        old.close_with_error(0, "").await.unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let found = registry.session(server.id(), SessionId::new(0)).unwrap();
        assert!(found.close_error().is_none());
        assert!(new.close_error().is_none());
    }
}
