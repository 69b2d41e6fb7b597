//! Admission control subsystem.
//!
//! # Data Flow
//! ```text
//! Route matched
//!     → controller.rs (AdmissionController::admit)
//!         - under limit: increment, return Lease
//!         - at limit: return Rejected (never waits)
//!     → Lease held across dispatch and response shaping
//!     → Lease dropped: counter decremented exactly once
//! ```
//!
//! # Design Decisions
//! - Bounded admission, not a queue: rejection is immediate
//! - Counters are keyed by route id and outlive table versions, so a reload
//!   never resets or double-counts in-flight requests
//! - Release is tied to `Drop`, covering timeouts, cancellation and panics

pub mod controller;

pub use controller::{AdmissionController, AdmissionStats, Lease, Rejected};
