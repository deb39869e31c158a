//! Tracked handle for one accepted connection.

use arc_swap::ArcSwap;
use futures_util::future::{BoxFuture, FutureExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::net::{Closable, Completion, ConnectionId, PeerCertificate, Stream};

/// What a session's close currently reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegateKind {
    /// The raw stream; no dispatcher has been installed yet.
    Stream,
    /// The dispatcher bound to the stream.
    Dispatcher,
}

struct Delegate {
    kind: DelegateKind,
    target: Arc<dyn Closable>,
}

/// Session handle for one accepted connection.
///
/// Closing a `ClientConnection` always reaches whichever closable is
/// installed at the time of the call: the stream until a dispatcher exists,
/// the dispatcher afterwards. Its completion is the stream's completion.
pub struct ClientConnection {
    id: ConnectionId,
    remote_addr: SocketAddr,
    local_addr: SocketAddr,
    peer_certificate: Option<PeerCertificate>,
    completion: Completion,
    delegate: ArcSwap<Delegate>,
    delegate_set: AtomicBool,
}

impl ClientConnection {
    /// Wrap `stream`; its close delegate starts as the stream itself.
    pub fn new<In, Out>(id: ConnectionId, stream: Arc<Stream<In, Out>>) -> Self
    where
        In: Send + 'static,
        Out: Send + 'static,
    {
        Self {
            id,
            remote_addr: stream.remote_addr(),
            local_addr: stream.local_addr(),
            peer_certificate: stream.peer_certificate().cloned(),
            completion: stream.completion().clone(),
            delegate: ArcSwap::from_pointee(Delegate {
                kind: DelegateKind::Stream,
                target: stream,
            }),
            delegate_set: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_certificate(&self) -> Option<&PeerCertificate> {
        self.peer_certificate.as_ref()
    }

    /// Fires when the underlying connection is torn down.
    pub fn completion(&self) -> &Completion {
        &self.completion
    }

    pub fn is_closed(&self) -> bool {
        self.completion.is_complete()
    }

    /// Which closable a `close` issued now would reach.
    pub fn delegate_kind(&self) -> DelegateKind {
        self.delegate.load().kind
    }

    /// Close the connection. No-op when it is already closed.
    pub async fn close(&self, deadline: Duration) {
        if self.completion.is_complete() {
            return;
        }
        let current = self.delegate.load_full();
        tracing::debug!(connection_id = %self.id, delegate = ?current.kind, "Closing session");
        current.target.close(deadline).await;
    }

    /// Install the dispatcher as close delegate. Only the first call has an effect.
    pub(crate) fn set_delegate(&self, dispatcher: Arc<dyn Closable>) -> bool {
        if self.delegate_set.swap(true, Ordering::AcqRel) {
            tracing::warn!(connection_id = %self.id, "Close delegate already installed");
            return false;
        }
        self.delegate.store(Arc::new(Delegate {
            kind: DelegateKind::Dispatcher,
            target: dispatcher,
        }));
        true
    }
}

impl Closable for ClientConnection {
    fn close(&self, deadline: Duration) -> BoxFuture<'_, ()> {
        ClientConnection::close(self, deadline).boxed()
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("local_addr", &self.local_addr)
            .field("delegate", &self.delegate_kind())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::StreamInfo;
    use std::sync::atomic::AtomicUsize;

    struct CountingClosable {
        closes: AtomicUsize,
        stream: Arc<Stream<String, String>>,
    }

    impl Closable for CountingClosable {
        fn close(&self, deadline: Duration) -> BoxFuture<'_, ()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.stream.close(deadline)
        }
    }

    fn stream() -> Arc<Stream<String, String>> {
        let info = StreamInfo::new("10.0.0.1:1234".parse().unwrap(), "10.0.0.2:80".parse().unwrap());
        let (stream, peer) = Stream::pair(info);
        // keep the transport side open for the duration of the test
        std::mem::forget(peer);
        Arc::new(stream)
    }

    #[tokio::test]
    async fn close_before_swap_reaches_stream() {
        let stream = stream();
        let conn = ClientConnection::new(ConnectionId::new(), stream.clone());

        assert_eq!(conn.delegate_kind(), DelegateKind::Stream);
        assert_eq!(conn.remote_addr(), stream.remote_addr());
        conn.close(Duration::from_secs(1)).await;

        assert!(stream.is_closed());
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn close_after_swap_reaches_delegate() {
        let stream = stream();
        let conn = ClientConnection::new(ConnectionId::new(), stream.clone());
        let dispatcher = Arc::new(CountingClosable {
            closes: AtomicUsize::new(0),
            stream: stream.clone(),
        });

        assert!(conn.set_delegate(dispatcher.clone()));
        assert!(!conn.set_delegate(dispatcher.clone()));
        assert_eq!(conn.delegate_kind(), DelegateKind::Dispatcher);

        conn.close(Duration::from_secs(1)).await;
        assert_eq!(dispatcher.closes.load(Ordering::SeqCst), 1);
        assert!(conn.completion().same_as(stream.completion()));
        assert!(conn.is_closed());

        // already closed: nothing reaches the delegate
        conn.close(Duration::from_secs(1)).await;
        assert_eq!(dispatcher.closes.load(Ordering::SeqCst), 1);
    }
}
