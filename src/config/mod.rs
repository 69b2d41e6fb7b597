//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → Gateway compiles routes and publishes a RouteTable
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → Gateway::reload → RouteStore::publish (atomic swap)
//! ```
//!
//! # Design Decisions
//! - The routing core never reads files; it only accepts parsed records
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::{
    AdminConfig, AdmissionConfig, CircuitBreakerConfig, ClientConfig, GatewayConfig,
    HeaderAction, HeaderRuleConfig, HealthCheckConfig, ListenerConfig, LoadBalancingPolicy,
    LogFormat, ObservabilityConfig, RetryConfig, RouteConfig, TimeoutConfig, UpstreamConfig,
};
