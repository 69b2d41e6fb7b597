//! API gateway core library.
//!
//! Routes inbound HTTP requests to upstream services with per-route
//! admission limits, timeouts, retries and per-upstream circuit breakers.

pub mod admin;
pub mod admission;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod resilience;
pub mod routing;

pub use config::GatewayConfig;
pub use gateway::Gateway;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
