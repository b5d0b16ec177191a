//! Connection admission and lifecycle tracking.
//!
//! # Responsibilities
//! - Hold the "currently accepting" flag and the in-flight connection count
//! - Generate unique connection IDs for tracing
//! - Let the stop path wait until every admitted connection has closed

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Shared admission state.
///
/// Both fields change under the watch channel's lock, so admitting a
/// connection and closing admission can never interleave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerState {
    pub accepting: bool,
    pub active: u64,
}

/// Tracks active connections for graceful shutdown.
///
/// Uses a watch channel to signal when connections change.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    state: Arc<watch::Sender<TrackerState>>,
}

impl ConnectionTracker {
    /// Create a new connection tracker that is accepting.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(TrackerState {
            accepting: true,
            active: 0,
        });
        Self {
            state: Arc::new(tx),
        }
    }

    /// Admit a new connection. Returns a guard that decrements on drop, or
    /// `None` once admission has been closed.
    pub fn try_track(&self) -> Option<ConnectionGuard> {
        let admitted = self.state.send_if_modified(|state| {
            if state.accepting {
                state.active += 1;
                true
            } else {
                false
            }
        });

        admitted.then(|| ConnectionGuard {
            state: Arc::clone(&self.state),
            id: ConnectionId::next(),
        })
    }

    /// Stop admitting connections. Returns `true` if this call closed admission.
    pub fn close(&self) -> bool {
        self.state.send_if_modified(|state| {
            let was_accepting = state.accepting;
            state.accepting = false;
            was_accepting
        })
    }

    pub fn is_accepting(&self) -> bool {
        self.state.borrow().accepting
    }

    /// Get current active connection count.
    pub fn active_count(&self) -> u64 {
        self.state.borrow().active
    }

    /// Wait until all admitted connections are closed.
    pub async fn wait_idle(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|state| state.active == 0).await;
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that tracks a connection's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    state: Arc<watch::Sender<TrackerState>>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.state.send_modify(|state| state.active -= 1);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn connection_ids_are_unique() {
        let tracker = ConnectionTracker::new();
        let first = tracker.try_track().unwrap();
        let second = tracker.try_track().unwrap();
        assert_ne!(first.id(), second.id());
        assert!(second.id().to_string().starts_with("conn-"));
    }

    #[test]
    fn connection_tracker_counts() {
        let tracker = ConnectionTracker::new();
        assert_eq!(tracker.active_count(), 0);

        let guard1 = tracker.try_track().unwrap();
        assert_eq!(tracker.active_count(), 1);

        let guard2 = tracker.try_track().unwrap();
        assert_eq!(tracker.active_count(), 2);

        drop(guard1);
        assert_eq!(tracker.active_count(), 1);

        drop(guard2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn closed_tracker_rejects() {
        let tracker = ConnectionTracker::new();
        let _held = tracker.try_track().unwrap();

        assert!(tracker.close());
        assert!(!tracker.close());
        assert!(!tracker.is_accepting());
        assert!(tracker.try_track().is_none());
        assert_eq!(tracker.active_count(), 1);
    }

    #[tokio::test]
    async fn wait_idle_returns_when_last_guard_drops() {
        let tracker = ConnectionTracker::new();
        let guard = tracker.try_track().unwrap();

        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait_idle().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait_idle should complete")
            .unwrap();
    }

    #[tokio::test]
    async fn wait_idle_with_nothing_tracked_is_immediate() {
        let tracker = ConnectionTracker::new();
        tokio::time::timeout(Duration::from_millis(100), tracker.wait_idle())
            .await
            .unwrap();
    }
}
