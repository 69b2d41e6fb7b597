//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route matched → UpstreamTarget identified
//!     → Apply load balancing policy:
//!         - round_robin.rs (rotate through endpoints)
//!         - least_in_flight.rs (pick endpoint with fewest in-flight requests)
//!     → endpoint.rs (take in-flight slot, RAII guard)
//!     → Return guard or None (no eligible endpoint)
//! ```
//!
//! # Design Decisions
//! - Policies are stateless apart from the round-robin cursor
//! - Policy selection per upstream
//! - Unhealthy endpoints excluded from selection
//! - registry.rs reuses targets across reloads so circuit state persists

pub mod endpoint;
pub mod least_in_flight;
pub mod registry;
pub mod round_robin;
pub mod upstream;

use std::fmt::Debug;
use std::sync::Arc;

pub use endpoint::{Endpoint, EndpointGuard, HealthState};
pub use registry::UpstreamRegistry;
pub use upstream::{HealthThresholds, UpstreamSnapshot, UpstreamTarget};

/// Endpoint selection policy.
pub trait LoadBalancer: Send + Sync + Debug {
    /// Pick an eligible endpoint, or None if there is none.
    fn select(&self, endpoints: &[Arc<Endpoint>]) -> Option<Arc<Endpoint>>;
}
