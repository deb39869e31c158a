//! Accepted connection streams.
//!
//! # Responsibilities
//! - Carry typed inbound/outbound messages for one accepted connection
//! - Expose peer/local addresses and the optional peer certificate
//! - Fire a completion signal exactly once on teardown
//!
//! # Design Decisions
//! - A stream is a pair of bounded channels; the acceptor owns the other
//!   end (`StreamPeer`) and bridges it to the real transport
//! - Either side closing fires the same `Completion`
//! - The transport side may end its inbound direction alone (half-close);
//!   the stream then stays writable until it is closed

use futures_util::future::{BoxFuture, FutureExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use crate::net::closable::Closable;
use crate::net::completion::Completion;

/// Channel depth for each direction of a stream.
pub const STREAM_BUFFER: usize = 64;

/// Returned when writing to a stream whose connection is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("stream closed")]
pub struct StreamClosed;

/// Identity presented by the remote end of a connection (e.g. a TLS client certificate).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCertificate {
    subject: String,
    der: Arc<[u8]>,
}

impl PeerCertificate {
    pub fn new(subject: impl Into<String>, der: impl Into<Arc<[u8]>>) -> Self {
        Self {
            subject: subject.into(),
            der: der.into(),
        }
    }

    /// Subject name of the certificate.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Raw DER encoding.
    pub fn der(&self) -> &[u8] {
        &self.der
    }
}

/// Addressing and identity metadata for a new stream.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub remote_addr: SocketAddr,
    pub local_addr: SocketAddr,
    pub peer_certificate: Option<PeerCertificate>,
}

impl StreamInfo {
    pub fn new(remote_addr: SocketAddr, local_addr: SocketAddr) -> Self {
        Self {
            remote_addr,
            local_addr,
            peer_certificate: None,
        }
    }

    pub fn with_peer_certificate(mut self, cert: PeerCertificate) -> Self {
        self.peer_certificate = Some(cert);
        self
    }
}

/// Server side of one accepted connection.
#[derive(Debug)]
pub struct Stream<In, Out> {
    inbound: Mutex<mpsc::Receiver<In>>,
    outbound: mpsc::Sender<Out>,
    info: StreamInfo,
    completion: Completion,
}

/// Transport side of a [`Stream`], held by the acceptor (or a test).
#[derive(Debug)]
pub struct StreamPeer<In, Out> {
    tx: Option<mpsc::Sender<In>>,
    rx: mpsc::Receiver<Out>,
    completion: Completion,
}

impl<In, Out> Stream<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Create a connected stream/peer pair.
    pub fn pair(info: StreamInfo) -> (Stream<In, Out>, StreamPeer<In, Out>) {
        let (in_tx, in_rx) = mpsc::channel(STREAM_BUFFER);
        let (out_tx, out_rx) = mpsc::channel(STREAM_BUFFER);
        let completion = Completion::new();

        let stream = Stream {
            inbound: Mutex::new(in_rx),
            outbound: out_tx,
            info,
            completion: completion.clone(),
        };
        let peer = StreamPeer {
            tx: Some(in_tx),
            rx: out_rx,
            completion,
        };
        (stream, peer)
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.info.remote_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.info.local_addr
    }

    pub fn peer_certificate(&self) -> Option<&PeerCertificate> {
        self.info.peer_certificate.as_ref()
    }

    /// Completion signal of the underlying connection.
    pub fn completion(&self) -> &Completion {
        &self.completion
    }

    pub fn is_closed(&self) -> bool {
        self.completion.is_complete()
    }

    /// Receive the next inbound message.
    ///
    /// Returns `None` once the connection is torn down or the peer has
    /// finished sending. A peer that hangs up entirely fires the completion;
    /// one that only finished sending leaves the stream open for writes.
    pub async fn recv(&self) -> Option<In> {
        if self.completion.is_complete() {
            return None;
        }
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            msg = inbound.recv() => {
                if msg.is_none() && self.outbound.is_closed() {
                    self.completion.fire();
                }
                msg
            }
            _ = self.completion.wait() => None,
        }
    }

    /// Take an already-buffered inbound message without waiting.
    pub fn try_recv(&self) -> Option<In> {
        if self.completion.is_complete() {
            return None;
        }
        let mut inbound = self.inbound.try_lock().ok()?;
        inbound.try_recv().ok()
    }

    /// Write a message to the peer.
    ///
    /// Waits for buffer space, but never past the stream's completion.
    pub async fn send(&self, msg: Out) -> Result<(), StreamClosed> {
        if self.completion.is_complete() {
            return Err(StreamClosed);
        }
        tokio::select! {
            sent = self.outbound.send(msg) => {
                if sent.is_err() {
                    self.completion.fire();
                    return Err(StreamClosed);
                }
                Ok(())
            }
            _ = self.completion.wait() => Err(StreamClosed),
        }
    }
}

impl<In, Out> Closable for Stream<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    fn close(&self, _deadline: Duration) -> BoxFuture<'_, ()> {
        if self.completion.fire() {
            tracing::trace!(remote_addr = %self.info.remote_addr, "Stream closed");
        }
        futures_util::future::ready(()).boxed()
    }
}

impl<In, Out> StreamPeer<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    /// Deliver a message to the server side.
    pub async fn send(&self, msg: In) -> Result<(), StreamClosed> {
        let Some(tx) = &self.tx else {
            return Err(StreamClosed);
        };
        if self.completion.is_complete() {
            return Err(StreamClosed);
        }
        tokio::select! {
            sent = tx.send(msg) => sent.map_err(|_| StreamClosed),
            _ = self.completion.wait() => Err(StreamClosed),
        }
    }

    /// Stop sending while still receiving (transport half-close).
    pub fn finish(&mut self) {
        self.tx = None;
    }

    /// Next message written by the server side.
    ///
    /// Messages written before teardown are still delivered; afterwards
    /// this returns `None`.
    pub async fn recv(&mut self) -> Option<Out> {
        tokio::select! {
            biased;
            msg = self.rx.recv() => msg,
            _ = self.completion.wait() => self.rx.try_recv().ok(),
        }
    }

    /// Tear down the connection from the transport side.
    pub fn close(&self) {
        self.completion.fire();
    }

    pub fn completion(&self) -> &Completion {
        &self.completion
    }
}
