//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to upstream:
//!     → circuit_breaker.rs (fail fast when open, single trial when half-open)
//!     → timeouts.rs (enforce attempt timeout within the request deadline)
//!     → On failure: retries.rs (route idempotent? budget left?) + backoff.rs
//!     → circuit_breaker.rs (record outcome, open circuit if threshold crossed)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every upstream call has a deadline
//! - Retries only for idempotent routes, never while the circuit is open
//! - Circuit breaker prevents cascading failures
//! - Every threshold comes from configuration

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use backoff::Backoff;
pub use circuit_breaker::{CallPermit, CircuitBreaker, CircuitOpenError, CircuitState};
pub use retries::{RetryBudget, RetryPolicy};
