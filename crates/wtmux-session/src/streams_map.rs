//! Per-session registry of open streams
//!
//! Each live stream leaves a callback here that forcibly tears it down. When
//! the session closes every callback runs once and the map is retired, so
//! streams removing themselves afterwards find nothing to do.

use std::collections::HashMap;
use std::fmt;
use std::mem;

use parking_lot::Mutex;
use wtmux_core::ConnectionError;
use wtmux_proto::StreamId;

/// Callback that tears a stream down when its session closes
pub type CloseFn = Box<dyn FnOnce(&ConnectionError) + Send>;

enum Entries {
    Open(HashMap<StreamId, CloseFn>),
    /// Session is gone; keeps the reason for late arrivals
    Closed(ConnectionError),
}

/// Open streams of one session, keyed by transport stream ID
pub struct StreamsMap {
    entries: Mutex<Entries>,
}

impl StreamsMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Entries::Open(HashMap::new())),
        }
    }

    /// Track a stream
    ///
    /// If the session already closed the callback runs immediately with the
    /// recorded close reason.
    pub fn add_stream(&self, id: StreamId, close_fn: CloseFn) {
        let closed = {
            let mut entries = self.entries.lock();
            match &mut *entries {
                Entries::Open(map) => {
                    map.insert(id, close_fn);
                    return;
                }
                Entries::Closed(err) => err.clone(),
            }
        };
        close_fn(&closed);
    }

    /// Forget a stream; a no-op if it is unknown or the session is closed
    pub fn remove_stream(&self, id: StreamId) {
        if let Entries::Open(map) = &mut *self.entries.lock() {
            map.remove(&id);
        }
    }

    /// Run every registered callback with the close reason, then retire the map
    ///
    /// Only the first call does anything. Callbacks run outside the lock so
    /// they may call back into [`remove_stream`](Self::remove_stream).
    pub fn close_session(&self, err: &ConnectionError) {
        let streams = {
            let mut entries = self.entries.lock();
            if matches!(*entries, Entries::Closed(_)) {
                return;
            }
            match mem::replace(&mut *entries, Entries::Closed(err.clone())) {
                Entries::Open(streams) => streams,
                Entries::Closed(_) => return,
            }
        };

        tracing::debug!("Closing {} streams: {}", streams.len(), err);
        for (_, close_fn) in streams {
            close_fn(err);
        }
    }

    /// Number of tracked streams
    pub fn len(&self) -> usize {
        match &*self.entries.lock() {
            Entries::Open(map) => map.len(),
            Entries::Closed(_) => 0,
        }
    }

    /// Whether no streams are tracked
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the session has closed
    pub fn is_closed(&self) -> bool {
        matches!(*self.entries.lock(), Entries::Closed(_))
    }
}

impl Default for StreamsMap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StreamsMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamsMap")
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(counter: &Arc<AtomicUsize>) -> CloseFn {
        let counter = counter.clone();
        Box::new(move |_: &ConnectionError| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_close_runs_every_callback_once() {
        let map = StreamsMap::new();
        let closed = Arc::new(AtomicUsize::new(0));
        for id in [0, 4, 8] {
            map.add_stream(StreamId::new(id), counting(&closed));
        }
        assert_eq!(map.len(), 3);

        let err = ConnectionError::remote(1, "done");
        map.close_session(&err);
        map.close_session(&err);

        assert_eq!(closed.load(Ordering::SeqCst), 3);
        assert!(map.is_closed());
        assert!(map.is_empty());
    }

    #[test]
    fn test_removed_stream_is_not_closed() {
        let map = StreamsMap::new();
        let closed = Arc::new(AtomicUsize::new(0));
        map.add_stream(StreamId::new(0), counting(&closed));
        map.add_stream(StreamId::new(4), counting(&closed));

        map.remove_stream(StreamId::new(0));
        map.remove_stream(StreamId::new(100));
        map.close_session(&ConnectionError::default());

        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_receives_close_reason() {
        let map = StreamsMap::new();
        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        map.add_stream(
            StreamId::new(0),
            Box::new(move |err: &ConnectionError| *slot.lock() = Some(err.clone())),
        );

        map.close_session(&ConnectionError::local(42, "bye"));
        assert_eq!(*seen.lock(), Some(ConnectionError::local(42, "bye")));
    }

    #[test]
    fn test_remove_after_close_is_noop() {
        let map = StreamsMap::new();
        map.close_session(&ConnectionError::default());
        map.remove_stream(StreamId::new(0));
        assert!(map.is_closed());
    }

    #[test]
    fn test_add_after_close_runs_callback_immediately() {
        let map = StreamsMap::new();
        map.close_session(&ConnectionError::remote(3, ""));

        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        map.add_stream(
            StreamId::new(0),
            Box::new(move |err: &ConnectionError| *slot.lock() = Some(err.clone())),
        );
        assert_eq!(*seen.lock(), Some(ConnectionError::remote(3, "")));
        assert_eq!(map.len(), 0);
    }
}
