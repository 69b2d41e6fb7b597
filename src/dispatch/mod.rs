//! Upstream dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! Admitted request + matched Route
//!     → dispatcher.rs
//!         → circuit breaker permit (fail fast when open)
//!         → load balancer picks an endpoint
//!         → client.rs (send with attempt timeout)
//!         → classify outcome, settle permit, report endpoint health
//!         → retry with backoff while policy, budget and deadline allow
//!     → Response<Bytes> or DispatchError
//! ```
//!
//! # Design Decisions
//! - The upstream call is the only suspension point of the pipeline
//! - The HTTP client sits behind a trait so the core runs without a network
//! - Cancellation drops the in-flight attempt; RAII guards settle state

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod in_flight;

pub use client::{HyperUpstreamClient, SendError, UpstreamClient};
pub use dispatcher::Dispatcher;
pub use error::DispatchError;
pub use in_flight::InFlightRequest;
