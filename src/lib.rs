//! Session establishment core for network servers.
//!
//! Turns every accepted connection into a tracked, closable session,
//! independent of wire protocol, and degrades gracefully when the
//! application cannot build a handler for a connection.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod registry;
pub mod server;
pub mod session;

pub use config::ServerConfig;
pub use error::{BoxError, ServiceError, SharedError, TERMINATING_SESSION};
pub use lifecycle::Shutdown;
pub use net::{Acceptor, ConnectionTracker, PeerCertificate, SessionTracker, Stream, StreamInfo, TcpAcceptor};
pub use server::{ListeningServer, Server, ServerBuilder};
pub use session::{factory_fn, handler_fn, ClientConnection, Handler, HandlerFactory, LineProtocol, Protocol};
