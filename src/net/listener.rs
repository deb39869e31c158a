//! Acceptors: bind an address and hand every accepted connection over as a
//! [`Stream`].
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Accept incoming TCP connections
//! - Enforce max_connections limit via semaphore
//! - Bridge socket bytes to stream messages
//!
//! # Design Decisions
//! - A client half-close only ends the inbound direction; replies keep
//!   flowing until the stream completes
//! - Once the stream completes, pending writes get a bounded grace period,
//!   then the socket and its permit are released

use futures_util::future::{BoxFuture, FutureExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::lifecycle::Shutdown;
use crate::net::completion::Completion;
use crate::net::stream::{Stream, StreamInfo, StreamPeer};

/// Time a closed connection gets to flush pending writes by default.
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Callback invoked once for every accepted stream.
pub type OnStream<In, Out> = Arc<dyn Fn(Stream<In, Out>) + Send + Sync>;

/// Binds an address and produces streams.
pub trait Acceptor<In, Out>: Send + Sync + 'static {
    /// Human-readable description, exported to the registry.
    fn describe(&self) -> String;

    /// Bind `addr` and call `on_stream` for each accepted connection.
    ///
    /// Bind failures are returned to the caller.
    fn listen(&self, addr: SocketAddr, on_stream: OnStream<In, Out>) -> BoxFuture<'_, Result<BoundListener, ListenerError>>;
}

/// A running accept loop.
#[derive(Debug)]
pub struct BoundListener {
    local_addr: SocketAddr,
    shutdown: Shutdown,
}

impl BoundListener {
    pub fn new(local_addr: SocketAddr, shutdown: Shutdown) -> Self {
        Self { local_addr, shutdown }
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting. Connections already accepted are unaffected.
    pub fn stop(&self) {
        self.shutdown.trigger();
    }
}

/// Newline-delimited TCP acceptor with a bound on concurrent connections.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// new connections wait in the kernel backlog until a slot becomes available.
#[derive(Debug, Clone)]
pub struct TcpAcceptor {
    max_connections: usize,
    close_grace: Duration,
}

impl TcpAcceptor {
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            close_grace: DEFAULT_CLOSE_GRACE,
        }
    }

    /// How long a closed connection may keep flushing writes to a client
    /// that is not reading.
    pub fn close_grace(mut self, grace: Duration) -> Self {
        self.close_grace = grace;
        self
    }

    /// Get configured maximum connections.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

impl Acceptor<String, String> for TcpAcceptor {
    fn describe(&self) -> String {
        format!("TcpAcceptor(max_connections={})", self.max_connections)
    }

    fn listen(
        &self,
        addr: SocketAddr,
        on_stream: OnStream<String, String>,
    ) -> BoxFuture<'_, Result<BoundListener, ListenerError>> {
        async move {
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|source| ListenerError::Bind { addr, source })?;
            let local_addr = listener
                .local_addr()
                .map_err(|source| ListenerError::Bind { addr, source })?;

            tracing::info!(
                address = %local_addr,
                max_connections = self.max_connections,
                "Listener bound"
            );

            let shutdown = Shutdown::new();
            let limit = Arc::new(Semaphore::new(self.max_connections));
            tokio::spawn(accept_loop(
                listener,
                local_addr,
                limit,
                self.close_grace,
                shutdown.clone(),
                on_stream,
            ));

            Ok(BoundListener::new(local_addr, shutdown))
        }
        .boxed()
    }
}

async fn accept_loop(
    listener: TcpListener,
    local_addr: SocketAddr,
    limit: Arc<Semaphore>,
    close_grace: Duration,
    shutdown: Shutdown,
    on_stream: OnStream<String, String>,
) {
    let mut stop = shutdown.subscribe();
    if shutdown.is_triggered() {
        return;
    }

    loop {
        // Acquire permit first (backpressure)
        let permit = tokio::select! {
            _ = stop.recv() => break,
            permit = Arc::clone(&limit).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let (socket, peer_addr) = tokio::select! {
            _ = stop.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                    continue;
                }
            },
        };

        tracing::debug!(
            peer_addr = %peer_addr,
            available_permits = limit.available_permits(),
            "Connection accepted"
        );

        let (stream, peer) = Stream::pair(StreamInfo::new(peer_addr, local_addr));
        tokio::spawn(bridge(socket, peer, close_grace, permit));
        on_stream(stream);
    }

    tracing::info!(address = %local_addr, "Listener stopped");
}

/// Shuttle lines between the socket and the stream until the stream
/// completes. The permit is held for the connection's lifetime.
async fn bridge(
    socket: TcpStream,
    mut peer: StreamPeer<String, String>,
    close_grace: Duration,
    _permit: OwnedSemaphorePermit,
) {
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut reading = true;

    let expired = grace_expired(peer.completion().clone(), close_grace);
    tokio::pin!(expired);

    loop {
        tokio::select! {
            line = lines.next_line(), if reading => match line {
                Ok(Some(line)) => {
                    let line = line.trim_end_matches('\r').to_string();
                    if peer.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    tracing::trace!("Client finished sending");
                    reading = false;
                    peer.finish();
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Read failed");
                    break;
                }
            },
            out = peer.recv() => match out {
                Some(mut msg) => {
                    msg.push('\n');
                    tokio::select! {
                        written = writer.write_all(msg.as_bytes()) => {
                            if let Err(e) = written {
                                tracing::debug!(error = %e, "Write failed");
                                break;
                            }
                        }
                        _ = &mut expired => {
                            tracing::debug!(grace = ?close_grace, "Client not reading after close, dropping connection");
                            break;
                        }
                    }
                }
                None => break,
            },
            _ = &mut expired => break,
        }
    }

    let _ = writer.shutdown().await;
    peer.close();
}

/// Resolves `grace` after `completion` fires.
async fn grace_expired(completion: Completion, grace: Duration) {
    completion.wait().await;
    tokio::time::sleep(grace).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use crate::net::closable::Closable;

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        let acceptor = TcpAcceptor::new(4);
        let result = acceptor.listen(addr, Arc::new(|_stream: Stream<String, String>| {})).await;
        assert!(matches!(result, Err(ListenerError::Bind { .. })));
    }

    #[tokio::test]
    async fn half_closed_client_still_gets_replies() {
        let on_stream: OnStream<String, String> = Arc::new(|stream: Stream<String, String>| {
            tokio::spawn(async move {
                while let Some(line) = stream.recv().await {
                    let _ = stream.send(line.to_uppercase()).await;
                }
                // input finished, the stream is still writable
                let _ = stream.send("DONE".to_string()).await;
                stream.close(Duration::ZERO).await;
            });
        });

        let bound = TcpAcceptor::new(4)
            .listen("127.0.0.1:0".parse().unwrap(), on_stream)
            .await
            .unwrap();

        let client = TcpStream::connect(bound.local_addr()).await.unwrap();
        let (reader, mut writer) = client.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer.write_all(b"hello\n").await.unwrap();
        writer.shutdown().await.unwrap();

        let mut received = Vec::new();
        tokio::time::timeout(Duration::from_secs(2), async {
            while let Some(line) = lines.next_line().await.unwrap() {
                received.push(line);
            }
        })
        .await
        .expect("connection should close after the reply");
        assert_eq!(received, vec!["HELLO".to_string(), "DONE".to_string()]);

        bound.stop();
    }

    #[tokio::test]
    async fn lines_are_bridged() {
        let streams: Arc<Mutex<Vec<Arc<Stream<String, String>>>>> = Arc::default();
        let sink = Arc::clone(&streams);
        let on_stream: OnStream<String, String> = Arc::new(move |stream: Stream<String, String>| {
            let stream = Arc::new(stream);
            sink.lock().unwrap().push(Arc::clone(&stream));
            tokio::spawn(async move {
                while let Some(line) = stream.recv().await {
                    let _ = stream.send(line.to_uppercase()).await;
                }
                stream.close(Duration::ZERO).await;
            });
        });

        let acceptor = TcpAcceptor::new(4);
        assert_eq!(acceptor.describe(), "TcpAcceptor(max_connections=4)");
        let bound = acceptor.listen("127.0.0.1:0".parse().unwrap(), on_stream).await.unwrap();

        let client = TcpStream::connect(bound.local_addr()).await.unwrap();
        let (reader, mut writer) = client.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer.write_all(b"hello\r\n").await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.as_deref(), Some("HELLO"));

        let stream = streams.lock().unwrap()[0].clone();
        assert_eq!(stream.local_addr(), bound.local_addr());

        // client hangup completes the stream
        drop(writer);
        drop(lines);
        tokio::time::timeout(Duration::from_secs(2), stream.completion().wait())
            .await
            .expect("stream should complete after client hangup");

        bound.stop();
    }
}
