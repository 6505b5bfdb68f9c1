//! Pending "waiting for connect acknowledgement" marker
//!
//! At most one correlation is outstanding. Each arm allocates a fresh token;
//! a notification resolves whatever is armed at that moment, while the issuing
//! operation may only clear its own token. A resolution that arrives after
//! its waiter gave up finds the slot empty (or holding a newer token it does
//! not own) and is dropped.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Identifier of one armed correlation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationToken(u64);

#[derive(Debug, Default)]
pub struct PendingCorrelation {
    slot: Mutex<Option<(CorrelationToken, oneshot::Sender<bool>)>>,
    next: AtomicU64,
}

impl PendingCorrelation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a new correlation, replacing any previous one
    pub fn arm(&self) -> (CorrelationToken, oneshot::Receiver<bool>) {
        let token = CorrelationToken(self.next.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = oneshot::channel();
        *self.slot.lock() = Some((token, tx));
        (token, rx)
    }

    /// Resolve the armed correlation; returns false if none was pending
    pub fn resolve(&self, connected: bool) -> bool {
        match self.slot.lock().take() {
            Some((_, tx)) => {
                let _ = tx.send(connected);
                true
            },
            None => false,
        }
    }

    /// Clear the slot if it still holds `token`
    pub fn clear(&self, token: CorrelationToken) -> bool {
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|(t, _)| *t == token) {
            *slot = None;
            true
        } else {
            false
        }
    }

    pub fn is_pending(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub fn current(&self) -> Option<CorrelationToken> {
        self.slot.lock().as_ref().map(|(t, _)| *t)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_delivers_once() {
        let pending = PendingCorrelation::new();
        let (_, rx) = pending.arm();
        assert!(pending.resolve(true));
        assert!(!pending.resolve(false));
        assert!(rx.await.unwrap());
    }

    #[test]
    fn test_tokens_are_fresh() {
        let pending = PendingCorrelation::new();
        let (first, _rx1) = pending.arm();
        let (second, _rx2) = pending.arm();
        assert_ne!(first, second);
        // Stale owner cannot clear the newer correlation
        assert!(!pending.clear(first));
        assert_eq!(pending.current(), Some(second));
        assert!(pending.clear(second));
        assert!(!pending.is_pending());
    }

    #[tokio::test]
    async fn test_rearm_closes_previous_receiver() {
        let pending = PendingCorrelation::new();
        let (_, rx1) = pending.arm();
        let (_, _rx2) = pending.arm();
        assert!(rx1.await.is_err());
    }
}
