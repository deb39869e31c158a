//! The per-connection acceptance loop.
//!
//! For every accepted stream:
//! 1. wrap it in a [`ClientConnection`] whose close reaches the stream;
//! 2. build a handler, with the peer certificate bound as context;
//! 3. bind stream and handler (or a rejecting handler if construction
//!    failed) into a dispatcher, install it as the close delegate, and hand
//!    the session to the tracker;
//! 4. on failure, close the dispatcher with a generous deadline so the
//!    protocol can say goodbye instead of dropping the connection.

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{share, BoxError};
use crate::net::{Acceptor, BoundListener, Closable, ConnectionId, ConnectionTracker, ListenerError, OnStream, SessionTracker};
use crate::observability::metrics;
use crate::registry;
use crate::session::{
    context, ClientConnection, DispatcherFactory, HandlerFactory, ProtocolHandler, ProtocolStream, Protocol,
    RejectingHandler,
};

/// Default deadline for closing a session whose handler could not be built.
pub const DEGRADED_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Last element of every registry key exported by a server.
pub const LISTENER_REGISTRY_KIND: &str = "Listener";

/// Sessions whose handler is still being built.
#[derive(Default)]
pub(crate) struct Establishing {
    sessions: DashMap<ConnectionId, Arc<ClientConnection>>,
    idle: Notify,
}

impl Establishing {
    fn enter(&self, conn: &Arc<ClientConnection>) -> EstablishingGuard<'_> {
        self.sessions.insert(conn.id(), Arc::clone(conn));
        EstablishingGuard { set: self, id: conn.id() }
    }

    fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Resolve once no session is being established.
    async fn wait_idle(&self) {
        loop {
            let idle = self.idle.notified();
            if self.sessions.is_empty() {
                return;
            }
            idle.await;
        }
    }

    /// Close every session still waiting on its handler. Their close reaches
    /// the stream, so the dispatcher built later finds it closed.
    async fn close_all(&self, deadline: Duration) {
        let pending: Vec<_> = self.sessions.iter().map(|entry| Arc::clone(entry.value())).collect();
        futures_util::future::join_all(pending.iter().map(|conn| conn.close(deadline))).await;
    }
}

struct EstablishingGuard<'a> {
    set: &'a Establishing,
    id: ConnectionId,
}

impl Drop for EstablishingGuard<'_> {
    fn drop(&mut self) {
        self.set.sessions.remove(&self.id);
        if self.set.sessions.is_empty() {
            self.set.idle.notify_waiters();
        }
    }
}

/// Establishes sessions for protocol `P`. Built with [`crate::ServerBuilder`].
pub struct Server<P: Protocol> {
    pub(crate) label: String,
    pub(crate) bind_addr: SocketAddr,
    pub(crate) protocol: Arc<P>,
    pub(crate) handler_factory: Arc<dyn HandlerFactory<P::Request, P::Response>>,
    pub(crate) dispatcher_factory: Arc<dyn DispatcherFactory<P>>,
    pub(crate) tracker: Arc<dyn SessionTracker>,
    pub(crate) connections: Option<ConnectionTracker>,
    pub(crate) degraded_close_timeout: Duration,
    pub(crate) establishing: Establishing,
}

impl<P: Protocol> Server<P> {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// The built-in tracker, when no custom tracker was configured.
    pub fn connections(&self) -> Option<&ConnectionTracker> {
        self.connections.as_ref()
    }

    /// Bind with `acceptor` and establish a session for every stream it accepts.
    pub async fn serve<A>(self, acceptor: A) -> Result<ListeningServer<P>, ListenerError>
    where
        A: Acceptor<P::Request, P::Response>,
    {
        let server = Arc::new(self);

        let on_stream: OnStream<P::Request, P::Response> = {
            let server = Arc::clone(&server);
            Arc::new(move |stream: ProtocolStream<P>| {
                let server = Arc::clone(&server);
                tokio::spawn(async move {
                    server.serve_stream(stream).await;
                });
            })
        };

        let listener = acceptor.listen(server.bind_addr, on_stream).await?;

        let registry_key = vec![
            listener.local_addr().to_string(),
            server.protocol.name().to_string(),
            server.label.clone(),
            LISTENER_REGISTRY_KIND.to_string(),
        ];
        registry::put(&key_parts(&registry_key), acceptor.describe());

        tracing::info!(
            address = %listener.local_addr(),
            protocol = server.protocol.name(),
            server = %server.label,
            acceptor = %acceptor.describe(),
            "Serving"
        );

        Ok(ListeningServer {
            server,
            listener,
            registry_key,
        })
    }

    /// Establish a session for one accepted stream.
    ///
    /// Always ends with exactly one dispatcher bound to the stream. Returns
    /// the session once it has been handed to the tracker (and, for a
    /// degraded session, once its dispatcher has closed).
    pub async fn serve_stream(&self, stream: ProtocolStream<P>) -> Arc<ClientConnection> {
        let stream = Arc::new(stream);
        let conn = Arc::new(ClientConnection::new(ConnectionId::new(), Arc::clone(&stream)));
        let protocol = self.protocol.name();

        metrics::record_session_accepted(protocol);
        tracing::debug!(
            connection_id = %conn.id(),
            remote_addr = %conn.remote_addr(),
            server = %self.label,
            protocol,
            authenticated = conn.peer_certificate().is_some(),
            "Establishing session"
        );

        let establishing = self.establishing.enter(&conn);

        match self.create_handler(&stream, &conn).await {
            Ok(handler) => {
                self.bind(&conn, stream, handler);
                drop(establishing);
            }
            Err(err) => {
                tracing::warn!(
                    connection_id = %conn.id(),
                    remote_addr = %conn.remote_addr(),
                    error = %err,
                    deadline = ?self.degraded_close_timeout,
                    "Handler construction failed, terminating session"
                );
                metrics::record_session_degraded(protocol);

                let handler: ProtocolHandler<P> = Arc::new(RejectingHandler::new(share(err)));
                let dispatcher = self.bind(&conn, stream, handler);
                drop(establishing);
                dispatcher.close(self.degraded_close_timeout).await;
            }
        }

        conn
    }

    async fn create_handler(
        &self,
        stream: &ProtocolStream<P>,
        conn: &Arc<ClientConnection>,
    ) -> Result<ProtocolHandler<P>, BoxError> {
        match stream.peer_certificate() {
            // The factory itself runs inside the scope, not just the future it returns.
            Some(cert) => {
                context::with_peer_certificate(cert.clone(), async {
                    self.handler_factory.create(Arc::clone(conn)).await
                })
                .await
            }
            None => self.handler_factory.create(Arc::clone(conn)).await,
        }
    }

    /// Build the dispatcher, make it the close delegate, then let the tracker
    /// see the session. Nothing between construction and the swap suspends.
    fn bind(
        &self,
        conn: &Arc<ClientConnection>,
        stream: Arc<ProtocolStream<P>>,
        handler: ProtocolHandler<P>,
    ) -> Arc<dyn Closable> {
        let dispatcher = self.dispatcher_factory.new_dispatcher(stream, handler);
        conn.set_delegate(Arc::clone(&dispatcher));
        self.tracker.track(Arc::clone(conn));
        dispatcher
    }
}

fn key_parts(key: &[String]) -> Vec<&str> {
    key.iter().map(String::as_str).collect()
}

/// A server that is accepting connections.
pub struct ListeningServer<P: Protocol> {
    server: Arc<Server<P>>,
    listener: BoundListener,
    registry_key: Vec<String>,
}

impl<P: Protocol> ListeningServer<P> {
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub fn server(&self) -> &Arc<Server<P>> {
        &self.server
    }

    /// Key under which this server's acceptor is exported in the registry.
    pub fn registry_key(&self) -> Vec<&str> {
        key_parts(&self.registry_key)
    }

    /// Stop accepting, let sessions still being established finish, close
    /// every tracked session, and wait for them, all within `deadline`.
    ///
    /// Sessions whose handler is still being built when the deadline runs
    /// out have their stream closed. Returns `true` if everything closed in
    /// time. Sessions handed to a custom tracker are not closed here.
    pub async fn shutdown(self, deadline: Duration) -> bool {
        let deadline_at = Instant::now() + deadline;
        self.listener.stop();
        registry::remove(&key_parts(&self.registry_key));

        let establishing = &self.server.establishing;
        let mut drained = true;
        if tokio::time::timeout_at(deadline_at, establishing.wait_idle()).await.is_err() {
            tracing::warn!(pending = establishing.len(), "Sessions still being established at shutdown");
            establishing.close_all(Duration::ZERO).await;
            drained = false;
        }

        let Some(connections) = self.server.connections() else {
            return drained;
        };

        tracing::info!(
            address = %self.listener.local_addr(),
            sessions = connections.active_count(),
            "Draining sessions"
        );
        connections.close_all(deadline_at.saturating_duration_since(Instant::now())).await;
        let drained = connections
            .wait_for_drain(deadline_at.saturating_duration_since(Instant::now()))
            .await
            && drained;
        if !drained {
            tracing::warn!(remaining = connections.active_count(), "Sessions still open after drain timeout");
        }
        drained
    }
}
