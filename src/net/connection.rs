//! Connection identity and session tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Track live sessions until their connection completes
//! - Coordinate graceful shutdown across all sessions

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::observability::metrics;
use crate::session::ClientConnection;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Accounting hook invoked once per accepted connection, after its
/// dispatcher exists. Must not block.
pub trait SessionTracker: Send + Sync + 'static {
    fn track(&self, session: Arc<ClientConnection>);
}

/// Tracker backed by a closure. See [`tracker_fn`].
pub struct TrackerFn<F> {
    f: F,
}

/// Wrap `f` as a [`SessionTracker`].
pub fn tracker_fn<F>(f: F) -> TrackerFn<F>
where
    F: Fn(Arc<ClientConnection>) + Send + Sync + 'static,
{
    TrackerFn { f }
}

impl<F> SessionTracker for TrackerFn<F>
where
    F: Fn(Arc<ClientConnection>) + Send + Sync + 'static,
{
    fn track(&self, session: Arc<ClientConnection>) {
        (self.f)(session)
    }
}

/// Tracks live sessions for graceful shutdown.
///
/// A session is dropped from the tracker as soon as its connection completes.
/// Once [`close_all`](Self::close_all) has run, sessions tracked afterwards
/// are closed straight away.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    sessions: Arc<DashMap<ConnectionId, Arc<ClientConnection>>>,
    /// Deadline of the first `close_all`; set means the tracker is closing.
    closing: Arc<OnceLock<Duration>>,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current active session count.
    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Look up a live session.
    pub fn get(&self, id: ConnectionId) -> Option<Arc<ClientConnection>> {
        self.sessions.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Snapshot of all live sessions.
    pub fn sessions(&self) -> Vec<Arc<ClientConnection>> {
        self.sessions.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// Whether `close_all` has been called.
    pub fn is_closing(&self) -> bool {
        self.closing.get().is_some()
    }

    /// Close every live session, each with the given deadline, and every
    /// session tracked from now on.
    pub async fn close_all(&self, deadline: Duration) {
        let _ = self.closing.set(deadline);
        let sessions = self.sessions();
        tracing::info!(sessions = sessions.len(), deadline = ?deadline, "Closing all sessions");
        futures_util::future::join_all(sessions.iter().map(|s| s.close(deadline))).await;
    }

    /// Wait until every tracked session has completed or `timeout` elapses.
    /// Sessions tracked while waiting are waited for too.
    ///
    /// Returns `true` if the tracker drained.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let drained = async {
            loop {
                let open: Vec<_> = self.sessions().into_iter().filter(|s| !s.is_closed()).collect();
                if open.is_empty() {
                    break;
                }
                futures_util::future::join_all(open.iter().map(|s| s.completion().wait())).await;
            }
        };
        tokio::time::timeout(timeout, drained).await.is_ok()
    }
}

impl SessionTracker for ConnectionTracker {
    fn track(&self, session: Arc<ClientConnection>) {
        let id = session.id();
        if session.is_closed() {
            tracing::trace!(connection_id = %id, "Session already closed, not tracking");
            return;
        }

        self.sessions.insert(id, Arc::clone(&session));
        metrics::set_active_sessions(self.sessions.len());

        if let Some(&deadline) = self.closing.get() {
            tracing::debug!(connection_id = %id, "Session tracked after close_all, closing it");
            let late = Arc::clone(&session);
            tokio::spawn(async move { late.close(deadline).await });
        }

        let sessions = Arc::clone(&self.sessions);
        tokio::spawn(async move {
            session.completion().wait().await;
            sessions.remove(&id);
            metrics::set_active_sessions(sessions.len());
            tracing::trace!(connection_id = %id, "Connection closed");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{Stream, StreamInfo, StreamPeer};

    fn session() -> (Arc<ClientConnection>, StreamPeer<String, String>) {
        let info = StreamInfo::new("127.0.0.1:7000".parse().unwrap(), "127.0.0.1:7001".parse().unwrap());
        let (stream, peer) = Stream::<String, String>::pair(info);
        (Arc::new(ClientConnection::new(ConnectionId::new(), Arc::new(stream))), peer)
    }

    #[test]
    fn connection_id_unique() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id1.to_string().starts_with("conn-"));
    }

    #[tokio::test]
    async fn tracker_forgets_completed_sessions() {
        let tracker = ConnectionTracker::new();
        let (s1, p1) = session();
        let (s2, _p2) = session();

        tracker.track(s1.clone());
        tracker.track(s2.clone());
        assert_eq!(tracker.active_count(), 2);
        assert!(tracker.get(s1.id()).is_some());

        p1.close();
        tokio::time::timeout(Duration::from_secs(1), async {
            while tracker.active_count() != 1 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("completed session should be removed");
        assert!(tracker.get(s1.id()).is_none());
    }

    #[tokio::test]
    async fn close_all_drains() {
        let tracker = ConnectionTracker::new();
        let (s1, _p1) = session();
        let (s2, _p2) = session();
        tracker.track(s1.clone());
        tracker.track(s2.clone());

        assert!(!tracker.wait_for_drain(Duration::from_millis(20)).await);

        tracker.close_all(Duration::from_secs(1)).await;
        assert!(tracker.wait_for_drain(Duration::from_secs(1)).await);
        assert!(s1.is_closed() && s2.is_closed());
    }

    #[tokio::test]
    async fn sessions_tracked_after_close_all_are_closed() {
        let tracker = ConnectionTracker::new();
        tracker.close_all(Duration::from_secs(1)).await;
        assert!(tracker.is_closing());

        let (late, _peer) = session();
        tracker.track(late.clone());

        assert!(tracker.wait_for_drain(Duration::from_secs(1)).await);
        assert!(late.is_closed());
    }

    #[tokio::test]
    async fn closed_sessions_are_not_tracked() {
        let tracker = ConnectionTracker::new();
        let (s1, p1) = session();
        p1.close();

        tracker.track(s1);
        assert_eq!(tracker.active_count(), 0);
    }
}
