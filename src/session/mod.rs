//! Session subsystem: everything that turns an accepted stream into a
//! served, closable session.
//!
//! # Data Flow
//! ```text
//! Stream
//!     → client_connection.rs (session handle, swappable close delegate)
//!     → handler.rs (factory builds the handler; context.rs exposes the peer certificate)
//!     → dispatcher.rs (binds stream + handler, pumps messages)
//!     → protocol.rs (error/goodbye framing used by the dispatcher)
//! ```

pub mod client_connection;
pub mod context;
pub mod dispatcher;
pub mod handler;
pub mod protocol;

pub use client_connection::{ClientConnection, DelegateKind};
pub use dispatcher::{DispatcherFactory, ProtocolHandler, ProtocolStream, SerialDispatcher, SerialDispatcherFactory};
pub use handler::{
    factory_fn, handler_fn, BoxHandler, FactoryFn, Handler, HandlerFactory, HandlerFn, RejectingHandler,
    SharedHandlerFactory,
};
pub use protocol::{LineProtocol, Protocol};
