//! Shared utilities for integration tests.

#![allow(dead_code)]

use futures_util::future::{BoxFuture, FutureExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use session_server::error::BoxError;
use session_server::net::{Closable, StreamPeer};
use session_server::session::{
    factory_fn, handler_fn, ClientConnection, DispatcherFactory, HandlerFactory, ProtocolHandler, ProtocolStream,
    SerialDispatcherFactory,
};
use session_server::{LineProtocol, ServiceError, Stream, StreamInfo};

/// Stream info for a fake client connecting from `port`.
pub fn info(port: u16) -> StreamInfo {
    let remote: SocketAddr = format!("10.0.0.1:{}", port).parse().unwrap();
    let local: SocketAddr = "10.0.0.2:10000".parse().unwrap();
    StreamInfo::new(remote, local)
}

/// A line-protocol stream and the transport side driving it.
pub fn line_stream(info: StreamInfo) -> (ProtocolStream<LineProtocol>, StreamPeer<String, String>) {
    Stream::pair(info)
}

pub fn echo_handler() -> ProtocolHandler<LineProtocol> {
    Arc::new(handler_fn(|req: String| async move { Ok::<_, ServiceError>(format!("echo {}", req)) }))
}

/// Factory that always succeeds with [`echo_handler`].
pub fn echo_factory() -> impl HandlerFactory<String, String> {
    factory_fn(|_conn: Arc<ClientConnection>| async { Ok::<_, BoxError>(echo_handler()) })
}

/// Factory that always fails with `message`.
pub fn failing_factory(message: &'static str) -> impl HandlerFactory<String, String> {
    factory_fn(move |_conn: Arc<ClientConnection>| async move {
        Err::<ProtocolHandler<LineProtocol>, BoxError>(message.into())
    })
}

/// Wraps the serial dispatcher, counting constructions and recording every
/// close deadline. Also keeps each handler it was given.
#[derive(Clone)]
pub struct RecordingDispatcherFactory {
    inner: Arc<SerialDispatcherFactory<LineProtocol>>,
    pub created: Arc<AtomicUsize>,
    pub deadlines: Arc<Mutex<Vec<Duration>>>,
    pub handlers: Arc<Mutex<Vec<ProtocolHandler<LineProtocol>>>>,
}

impl RecordingDispatcherFactory {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SerialDispatcherFactory::new(Arc::new(LineProtocol))),
            created: Arc::default(),
            deadlines: Arc::default(),
            handlers: Arc::default(),
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn deadlines(&self) -> Vec<Duration> {
        self.deadlines.lock().unwrap().clone()
    }

    pub fn last_handler(&self) -> ProtocolHandler<LineProtocol> {
        self.handlers.lock().unwrap().last().cloned().expect("no dispatcher built")
    }
}

impl DispatcherFactory<LineProtocol> for RecordingDispatcherFactory {
    fn new_dispatcher(
        &self,
        stream: Arc<ProtocolStream<LineProtocol>>,
        handler: ProtocolHandler<LineProtocol>,
    ) -> Arc<dyn Closable> {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.handlers.lock().unwrap().push(Arc::clone(&handler));
        Arc::new(RecordingDispatcher {
            inner: self.inner.new_dispatcher(stream, handler),
            deadlines: Arc::clone(&self.deadlines),
        })
    }
}

struct RecordingDispatcher {
    inner: Arc<dyn Closable>,
    deadlines: Arc<Mutex<Vec<Duration>>>,
}

impl Closable for RecordingDispatcher {
    fn close(&self, deadline: Duration) -> BoxFuture<'_, ()> {
        self.deadlines.lock().unwrap().push(deadline);
        async move { self.inner.close(deadline).await }.boxed()
    }
}

/// Read lines from a peer until it closes, with an overall timeout.
pub async fn drain(peer: &mut StreamPeer<String, String>) -> Vec<String> {
    let mut lines = Vec::new();
    let collect = async {
        while let Some(line) = peer.recv().await {
            lines.push(line);
        }
    };
    tokio::time::timeout(Duration::from_secs(5), collect)
        .await
        .expect("peer did not close in time");
    lines
}
