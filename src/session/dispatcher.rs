//! Dispatchers bind one stream to one handler and own the message pump.
//!
//! # Responsibilities
//! - Pump requests from the stream through the handler
//! - Write replies, or the protocol's error response on failure
//! - Keep dispatcher and stream lifetimes equivalent
//!
//! # Design Decisions
//! - Closing the dispatcher answers requests the peer already sent, writes
//!   the protocol goodbye, then closes the stream, all within the deadline
//! - The stream completing on its own (peer hangup) cancels the pump
//! - The peer finishing its input (half-close) closes gracefully, as if
//!   `close` had been called

use futures_util::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::net::{Closable, Completion, Stream};
use crate::session::handler::BoxHandler;
use crate::session::protocol::Protocol;

/// Deadline for the graceful close that follows the peer finishing its input.
pub const END_OF_INPUT_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Stream type carried by protocol `P`.
pub type ProtocolStream<P> = Stream<<P as Protocol>::Request, <P as Protocol>::Response>;

/// Handler type serving protocol `P`.
pub type ProtocolHandler<P> = BoxHandler<<P as Protocol>::Request, <P as Protocol>::Response>;

/// Builds the dispatcher for an accepted stream.
///
/// Construction never fails; a dispatcher that cannot serve must fail its
/// requests instead.
pub trait DispatcherFactory<P: Protocol>: Send + Sync + 'static {
    fn new_dispatcher(&self, stream: Arc<ProtocolStream<P>>, handler: ProtocolHandler<P>) -> Arc<dyn Closable>;
}

/// Default factory producing [`SerialDispatcher`]s.
#[derive(Debug)]
pub struct SerialDispatcherFactory<P> {
    protocol: Arc<P>,
}

impl<P: Protocol> SerialDispatcherFactory<P> {
    pub fn new(protocol: Arc<P>) -> Self {
        Self { protocol }
    }
}

impl<P: Protocol> DispatcherFactory<P> for SerialDispatcherFactory<P> {
    fn new_dispatcher(&self, stream: Arc<ProtocolStream<P>>, handler: ProtocolHandler<P>) -> Arc<dyn Closable> {
        SerialDispatcher::spawn(stream, handler, Arc::clone(&self.protocol))
    }
}

/// Serves one request at a time, in arrival order.
pub struct SerialDispatcher<P: Protocol> {
    stream: Arc<ProtocolStream<P>>,
    protocol: Arc<P>,
    /// Close requested.
    closing: Completion,
    /// Pump loop exited.
    pump_done: Completion,
    /// Fully shut down; the stream is closed.
    done: Completion,
}

impl<P: Protocol> SerialDispatcher<P> {
    /// Bind `stream` to `handler` and start pumping.
    pub fn spawn(stream: Arc<ProtocolStream<P>>, handler: ProtocolHandler<P>, protocol: Arc<P>) -> Arc<Self> {
        let dispatcher = Arc::new(Self {
            stream,
            protocol,
            closing: Completion::new(),
            pump_done: Completion::new(),
            done: Completion::new(),
        });
        tokio::spawn(Arc::clone(&dispatcher).pump(handler));
        dispatcher
    }

    /// Fires once the dispatcher has shut down and its stream is closed.
    pub fn completion(&self) -> &Completion {
        &self.done
    }

    async fn pump(self: Arc<Self>, handler: ProtocolHandler<P>) {
        loop {
            let request = tokio::select! {
                biased;
                // Once closing, only answer what the peer already sent.
                _ = self.closing.wait() => match self.stream.try_recv() {
                    Some(request) => request,
                    None => break,
                },
                request = self.stream.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            let reply = tokio::select! {
                biased;
                _ = self.stream.completion().wait() => break,
                reply = handler.call(request) => reply,
            };

            let message = match reply {
                Ok(response) => response,
                Err(err) => {
                    tracing::debug!(
                        protocol = self.protocol.name(),
                        remote_addr = %self.stream.remote_addr(),
                        error = %err,
                        "Request failed"
                    );
                    self.protocol.error_response(&err)
                }
            };

            if self.stream.send(message).await.is_err() {
                break;
            }
        }

        self.pump_done.fire();

        if self.closing.is_complete() {
            // `shutdown` finishes the job.
            return;
        }

        if self.stream.is_closed() {
            self.done.fire();
            tracing::trace!(remote_addr = %self.stream.remote_addr(), "Dispatcher finished with stream");
        } else {
            tracing::trace!(remote_addr = %self.stream.remote_addr(), "Peer finished sending");
            self.shutdown(END_OF_INPUT_CLOSE_TIMEOUT).await;
        }
    }

    async fn shutdown(&self, deadline: Duration) {
        if !self.closing.fire() {
            self.done.wait().await;
            return;
        }

        let deadline_at = Instant::now() + deadline;

        if tokio::time::timeout_at(deadline_at, self.pump_done.wait()).await.is_err() {
            tracing::debug!(
                remote_addr = %self.stream.remote_addr(),
                deadline = ?deadline,
                "In-flight request did not finish before close deadline"
            );
        }

        if let Some(goodbye) = self.protocol.goodbye() {
            let _ = tokio::time::timeout_at(deadline_at, self.stream.send(goodbye)).await;
        }

        self.stream.close(deadline).await;
        self.done.fire();
    }
}

impl<P: Protocol> Closable for SerialDispatcher<P> {
    fn close(&self, deadline: Duration) -> BoxFuture<'_, ()> {
        self.shutdown(deadline).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::net::{StreamInfo, StreamPeer};
    use crate::session::handler::handler_fn;
    use crate::session::protocol::{LineProtocol, LINE_GOODBYE};

    fn bound(
        handler: ProtocolHandler<LineProtocol>,
    ) -> (Arc<SerialDispatcher<LineProtocol>>, StreamPeer<String, String>, Arc<ProtocolStream<LineProtocol>>) {
        let info = StreamInfo::new("127.0.0.1:1111".parse().unwrap(), "127.0.0.1:2222".parse().unwrap());
        let (stream, peer) = Stream::pair(info);
        let stream = Arc::new(stream);
        let dispatcher = SerialDispatcher::spawn(stream.clone(), handler, Arc::new(LineProtocol));
        (dispatcher, peer, stream)
    }

    fn echo() -> ProtocolHandler<LineProtocol> {
        Arc::new(handler_fn(|req: String| async move { Ok::<_, ServiceError>(format!("echo {}", req)) }))
    }

    #[tokio::test]
    async fn serves_requests_in_order() {
        let (_dispatcher, mut peer, _stream) = bound(echo());

        peer.send("one".into()).await.unwrap();
        peer.send("two".into()).await.unwrap();

        assert_eq!(peer.recv().await.as_deref(), Some("echo one"));
        assert_eq!(peer.recv().await.as_deref(), Some("echo two"));
    }

    #[tokio::test]
    async fn close_says_goodbye_and_closes_stream() {
        let (dispatcher, mut peer, stream) = bound(echo());

        dispatcher.close(Duration::from_secs(1)).await;

        assert!(stream.is_closed());
        assert!(dispatcher.completion().is_complete());
        assert_eq!(peer.recv().await.as_deref(), Some(LINE_GOODBYE));
        assert!(peer.recv().await.is_none());

        // second close resolves immediately
        dispatcher.close(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn close_answers_buffered_requests_first() {
        let info = StreamInfo::new("127.0.0.1:1111".parse().unwrap(), "127.0.0.1:2222".parse().unwrap());
        let (stream, mut peer) = Stream::pair(info);
        peer.send("early".to_string()).await.unwrap();

        let dispatcher = SerialDispatcher::spawn(Arc::new(stream), echo(), Arc::new(LineProtocol));
        dispatcher.close(Duration::from_secs(1)).await;

        assert_eq!(peer.recv().await.as_deref(), Some("echo early"));
        assert_eq!(peer.recv().await.as_deref(), Some(LINE_GOODBYE));
    }

    #[tokio::test]
    async fn peer_hangup_completes_dispatcher() {
        let (dispatcher, peer, stream) = bound(echo());

        peer.close();

        tokio::time::timeout(Duration::from_secs(1), dispatcher.completion().wait())
            .await
            .expect("dispatcher should complete after peer hangup");
        assert!(stream.is_closed());
    }

    #[tokio::test]
    async fn closing_stream_completes_dispatcher() {
        let (dispatcher, _peer, stream) = bound(echo());

        stream.close(Duration::from_secs(1)).await;

        tokio::time::timeout(Duration::from_secs(1), dispatcher.completion().wait())
            .await
            .expect("dispatcher should complete with its stream");
    }

    #[tokio::test]
    async fn end_of_input_closes_gracefully() {
        let (dispatcher, mut peer, stream) = bound(echo());

        peer.send("last".into()).await.unwrap();
        peer.finish();

        assert_eq!(peer.recv().await.as_deref(), Some("echo last"));
        assert_eq!(peer.recv().await.as_deref(), Some(LINE_GOODBYE));
        assert!(peer.recv().await.is_none());

        tokio::time::timeout(Duration::from_secs(1), dispatcher.completion().wait())
            .await
            .expect("dispatcher should complete after the peer finished sending");
        assert!(stream.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_request_is_cut_off_at_deadline() {
        let hang = Arc::new(handler_fn(|_req: String| async move {
            futures_util::future::pending::<Result<String, ServiceError>>().await
        }));
        let (dispatcher, peer, stream) = bound(hang);

        peer.send("stuck".into()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let started = Instant::now();
        dispatcher.close(Duration::from_secs(3)).await;

        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(stream.is_closed());
    }
}
