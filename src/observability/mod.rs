//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Core components produce:
//!     → events.rs (GatewayEvent through an injected EventSink)
//!     → tracing spans and log lines (request id on every line)
//!
//! Consumers:
//!     → logging.rs (stdout, pretty or JSON)
//!     → embedder-provided EventSink (external collector)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through all subsystems
//! - The core exposes hooks, never the collector itself
//! - No global sink: every component receives one at construction

pub mod events;
pub mod logging;

pub use events::{BufferedSink, EventSink, GatewayEvent, TracingSink};
