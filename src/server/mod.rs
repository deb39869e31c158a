//! Server assembly: the acceptance loop and its builder.
//!
//! # Data Flow
//! ```text
//! ServerBuilder (protocol, label, handler factory, dispatcher factory, tracker)
//!     → Server::serve(acceptor)
//!         → registry entry [identity, protocol, label, "Listener"]
//!         → acceptor.listen(addr, on_stream)
//!     → per stream: Server::serve_stream (acceptance.rs)
//! ```

pub mod acceptance;
pub mod builder;

pub use acceptance::{ListeningServer, Server};
pub use builder::{BuildError, ServerBuilder};
