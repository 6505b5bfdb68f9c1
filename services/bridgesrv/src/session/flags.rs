//! Session lifecycle flags shared between the session and the notification router

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

/// Tri-state value of one lifecycle flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriState {
    Unknown,
    False,
    True,
}

impl TriState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => TriState::False,
            2 => TriState::True,
            _ => TriState::Unknown,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            TriState::Unknown => 0,
            TriState::False => 1,
            TriState::True => 2,
        }
    }
}

/// Atomic tri-state flag
#[derive(Debug, Default)]
pub struct TriFlag(AtomicU8);

impl TriFlag {
    pub fn get(&self) -> TriState {
        TriState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, value: TriState) {
        self.0.store(value.as_u8(), Ordering::Release);
    }

    pub fn is_true(&self) -> bool {
        self.get() == TriState::True
    }
}

/// Point-in-time copy of all flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagSnapshot {
    pub ready: TriState,
    pub configured: TriState,
    pub link_open: TriState,
    pub connected: TriState,
}

/// Lifecycle flags plus a wakeup for tasks waiting on them
///
/// Setters only ever move a flag to `True` or `False`; `reset` is the single
/// way back to `Unknown`.
#[derive(Debug, Default)]
pub struct SessionFlags {
    ready: TriFlag,
    configured: TriFlag,
    link_open: TriFlag,
    connected: TriFlag,
    changed: Notify,
}

impl SessionFlags {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self, flag: &TriFlag, value: bool) {
        flag.set(if value { TriState::True } else { TriState::False });
        self.changed.notify_waiters();
    }

    pub fn set_ready(&self, value: bool) {
        self.store(&self.ready, value);
    }

    pub fn set_configured(&self, value: bool) {
        self.store(&self.configured, value);
    }

    pub fn set_link_open(&self, value: bool) {
        self.store(&self.link_open, value);
    }

    pub fn set_connected(&self, value: bool) {
        self.store(&self.connected, value);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.is_true()
    }

    pub fn is_configured(&self) -> bool {
        self.configured.is_true()
    }

    pub fn is_link_open(&self) -> bool {
        self.link_open.is_true()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.is_true()
    }

    /// Back to all-unknown (explicit close or teardown)
    pub fn reset(&self) {
        for flag in [&self.ready, &self.configured, &self.link_open, &self.connected] {
            flag.set(TriState::Unknown);
        }
        self.changed.notify_waiters();
    }

    pub fn snapshot(&self) -> FlagSnapshot {
        FlagSnapshot {
            ready: self.ready.get(),
            configured: self.configured.get(),
            link_open: self.link_open.get(),
            connected: self.connected.get(),
        }
    }

    /// Wait until `predicate` holds or `timeout` expires; returns whether it holds
    pub async fn wait_until<F>(&self, predicate: F, timeout: Duration) -> bool
    where
        F: Fn(&SessionFlags) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if predicate(self) {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return predicate(self);
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_flags_start_unknown() {
        let flags = SessionFlags::new();
        let snap = flags.snapshot();
        assert_eq!(snap.ready, TriState::Unknown);
        assert_eq!(snap.connected, TriState::Unknown);
        assert!(!flags.is_connected());
    }

    #[test]
    fn test_reset_clears_to_unknown() {
        let flags = SessionFlags::new();
        flags.set_ready(true);
        flags.set_link_open(false);
        assert_eq!(flags.snapshot().link_open, TriState::False);
        flags.reset();
        assert_eq!(flags.snapshot().ready, TriState::Unknown);
        assert_eq!(flags.snapshot().link_open, TriState::Unknown);
    }

    #[tokio::test]
    async fn test_wait_until_wakes_on_set() {
        let flags = Arc::new(SessionFlags::new());
        let setter = Arc::clone(&flags);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            setter.set_link_open(true);
        });
        assert!(
            flags
                .wait_until(|f| f.is_link_open(), Duration::from_secs(2))
                .await
        );
    }

    #[tokio::test]
    async fn test_wait_until_times_out() {
        let flags = SessionFlags::new();
        assert!(
            !flags
                .wait_until(|f| f.is_connected(), Duration::from_millis(30))
                .await
        );
    }
}
