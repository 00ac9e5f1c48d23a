//! Tracking of blocking opens in flight

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

/// Cancellation handles of every blocking open currently waiting
#[derive(Debug, Default)]
pub(crate) struct PendingOpens {
    next_id: AtomicU64,
    calls: DashMap<u64, CancellationToken>,
}

impl PendingOpens {
    /// Register a new open; it is forgotten again when the guard drops
    pub(crate) fn register(&self) -> PendingOpen<'_> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.calls.insert(id, token.clone());
        PendingOpen {
            owner: self,
            id,
            token,
        }
    }

    /// Cancel every registered open
    pub(crate) fn cancel_all(&self) {
        for call in self.calls.iter() {
            call.value().cancel();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.len()
    }
}

/// Registration of one blocking open
#[derive(Debug)]
pub(crate) struct PendingOpen<'a> {
    owner: &'a PendingOpens,
    id: u64,
    token: CancellationToken,
}

impl PendingOpen<'_> {
    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for PendingOpen<'_> {
    fn drop(&mut self) {
        self.owner.calls.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_deregisters_on_drop() {
        let pending = PendingOpens::default();
        let first = pending.register();
        let second = pending.register();
        assert_eq!(pending.len(), 2);

        drop(first);
        assert_eq!(pending.len(), 1);
        drop(second);
        assert_eq!(pending.len(), 0);
    }

    #[test]
    fn test_cancel_all_reaches_every_open() {
        let pending = PendingOpens::default();
        let a = pending.register();
        let b = pending.register();

        pending.cancel_all();
        assert!(a.token().is_cancelled());
        assert!(b.token().is_cancelled());

        // Opens registered later are unaffected
        let c = pending.register();
        assert!(!c.token().is_cancelled());
    }
}
