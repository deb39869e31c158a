//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//!
//! Shutdown (shutdown.rs):
//!     trigger → acceptors stop accepting → sessions closed → drain → exit
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, close sessions, drain
//! - Draining has a timeout; stragglers are abandoned

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
