//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! acceptance loop, dispatchers, tracker produce:
//!     → logging.rs (structured log events, one span of fields per connection)
//!     → metrics.rs (accepted/degraded counters, active gauge)
//! ```
//!
//! # Design Decisions
//! - Every connection is logged with its `conn-N` id
//! - Without an installed exporter, recording is a no-op

pub mod logging;
pub mod metrics;
