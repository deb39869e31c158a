//! Builder for [`Server`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use session_server::{handler_fn, LineProtocol, ServerBuilder, ServiceError, TcpAcceptor};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let server = ServerBuilder::new(LineProtocol)
//!     .label("yo")
//!     .handler(handler_fn(|_req: String| async { Ok::<_, ServiceError>("yo".to_string()) }))
//!     .bind_to("127.0.0.1:10000".parse()?)
//!     .build()?;
//! let listening = server.serve(TcpAcceptor::new(1024)).await?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::ServerConfig;
use crate::net::{ConnectionTracker, SessionTracker};
use crate::server::acceptance::{Establishing, Server, DEGRADED_CLOSE_TIMEOUT};
use crate::session::{
    DispatcherFactory, Handler, HandlerFactory, Protocol, SerialDispatcherFactory, SharedHandlerFactory,
};

/// Why a [`ServerBuilder`] could not produce a server.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no handler or handler factory configured")]
    MissingHandler,

    #[error("no bind address configured")]
    MissingBindAddress,

    #[error("invalid bind address {0:?}")]
    InvalidBindAddress(String),
}

/// Assembles a [`Server`] for protocol `P`.
pub struct ServerBuilder<P: Protocol> {
    protocol: Arc<P>,
    label: String,
    bind_addr: Option<SocketAddr>,
    handler_factory: Option<Arc<dyn HandlerFactory<P::Request, P::Response>>>,
    dispatcher_factory: Option<Arc<dyn DispatcherFactory<P>>>,
    tracker: Option<Arc<dyn SessionTracker>>,
    degraded_close_timeout: Duration,
}

impl<P: Protocol> ServerBuilder<P> {
    pub fn new(protocol: P) -> Self {
        Self {
            protocol: Arc::new(protocol),
            label: String::new(),
            bind_addr: None,
            handler_factory: None,
            dispatcher_factory: None,
            tracker: None,
            degraded_close_timeout: DEGRADED_CLOSE_TIMEOUT,
        }
    }

    /// Apply label, bind address and session timing from a loaded config.
    pub fn from_config(protocol: P, config: &ServerConfig) -> Result<Self, BuildError> {
        let bind_addr = config
            .listener
            .bind_address
            .parse()
            .map_err(|_| BuildError::InvalidBindAddress(config.listener.bind_address.clone()))?;

        Ok(Self::new(protocol)
            .label(config.server.label.clone())
            .bind_to(bind_addr)
            .degraded_close_timeout(config.session.degraded_close_timeout()))
    }

    /// Label used in logs and the registry. Defaults to the protocol name.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn bind_to(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = Some(addr);
        self
    }

    /// Build a fresh handler for every connection.
    pub fn handler_factory<F>(mut self, factory: F) -> Self
    where
        F: HandlerFactory<P::Request, P::Response>,
    {
        self.handler_factory = Some(Arc::new(factory));
        self
    }

    /// Serve every connection with the same handler.
    pub fn handler<H>(self, handler: H) -> Self
    where
        H: Handler<P::Request, P::Response>,
    {
        self.handler_factory(SharedHandlerFactory::new(Arc::new(handler)))
    }

    /// Replace the default [`SerialDispatcherFactory`].
    pub fn dispatcher_factory<D>(mut self, factory: D) -> Self
    where
        D: DispatcherFactory<P>,
    {
        self.dispatcher_factory = Some(Arc::new(factory));
        self
    }

    /// Replace the default [`ConnectionTracker`].
    pub fn tracker<T>(mut self, tracker: T) -> Self
    where
        T: SessionTracker,
    {
        self.tracker = Some(Arc::new(tracker));
        self
    }

    /// Deadline for closing sessions whose handler could not be built.
    pub fn degraded_close_timeout(mut self, timeout: Duration) -> Self {
        self.degraded_close_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<Server<P>, BuildError> {
        let handler_factory = self.handler_factory.ok_or(BuildError::MissingHandler)?;
        let bind_addr = self.bind_addr.ok_or(BuildError::MissingBindAddress)?;

        let dispatcher_factory: Arc<dyn DispatcherFactory<P>> = match self.dispatcher_factory {
            Some(factory) => factory,
            None => Arc::new(SerialDispatcherFactory::new(Arc::clone(&self.protocol))),
        };

        let (tracker, connections) = match self.tracker {
            Some(tracker) => (tracker, None),
            None => {
                let connections = ConnectionTracker::new();
                let tracker: Arc<dyn SessionTracker> = Arc::new(connections.clone());
                (tracker, Some(connections))
            }
        };

        let label = if self.label.is_empty() {
            self.protocol.name().to_string()
        } else {
            self.label
        };

        Ok(Server {
            label,
            bind_addr,
            protocol: self.protocol,
            handler_factory,
            dispatcher_factory,
            tracker,
            connections,
            degraded_close_timeout: self.degraded_close_timeout,
            establishing: Establishing::default(),
        })
    }
}
