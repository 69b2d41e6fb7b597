//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe every endpoint of every upstream
//!     → UpstreamTarget::report
//!
//! Passive health checks (dispatch):
//!     Request outcome observed
//!     → UpstreamTarget::report
//!
//! State machine (load_balancer/endpoint.rs):
//!     Unknown → Healthy ←→ Unhealthy
//!     With thresholds to prevent flapping
//! ```
//!
//! # Design Decisions
//! - Active and passive checks are complementary
//! - State transitions require consecutive successes/failures
//! - Health state is per-endpoint, not per-upstream
//! - 4xx answers are not failures (client error, not upstream)

pub mod active;

pub use active::HealthMonitor;
