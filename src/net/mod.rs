//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits, line bridge)
//!     → stream.rs (typed message channels + completion signal)
//!     → server acceptance loop (session, handler, dispatcher)
//!     → connection.rs (session tracking until completion)
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - Transport teardown is observed only through `Completion`

pub mod closable;
pub mod completion;
pub mod connection;
pub mod listener;
pub mod stream;

pub use closable::Closable;
pub use completion::Completion;
pub use connection::{tracker_fn, ConnectionId, ConnectionTracker, SessionTracker};
pub use listener::{Acceptor, BoundListener, ListenerError, OnStream, TcpAcceptor};
pub use stream::{PeerCertificate, Stream, StreamClosed, StreamInfo, StreamPeer};
