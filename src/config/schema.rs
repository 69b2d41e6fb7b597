//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.
//! Every resilience threshold lives here as a knob with a default; the core
//! never hard-codes one.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, body limit).
    pub listener: ListenerConfig,

    /// Route definitions mapping requests to upstreams, in declaration order.
    pub routes: Vec<RouteConfig>,

    /// Upstream service definitions.
    pub upstreams: Vec<UpstreamConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Default retry policy.
    pub retries: RetryConfig,

    /// Default circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Admission control settings.
    pub admission: AdmissionConfig,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Outbound HTTP client settings.
    pub client: ClientConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum buffered request body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Route record mapping a request predicate to an upstream.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RouteConfig {
    /// Unique route identifier.
    pub id: String,

    /// Path pattern: "/exact", "/prefix/*" or "*".
    pub path: String,

    /// Allowed methods (empty = any).
    #[serde(default)]
    pub methods: Vec<String>,

    /// Host header to match (case-insensitive).
    #[serde(default)]
    pub host: Option<String>,

    /// Headers that must be present with exactly these values.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Upstream name to forward to.
    pub upstream: String,

    /// Per-attempt upstream timeout; falls back to `timeouts.upstream_ms`.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Concurrency limit; falls back to `admission.default_max_in_flight`.
    #[serde(default)]
    pub max_in_flight: Option<usize>,

    /// Whether requests on this route may be retried.
    /// Unset means "retry only idempotent methods".
    #[serde(default)]
    pub idempotent: Option<bool>,

    /// Retry policy override.
    #[serde(default)]
    pub retry: Option<RetryConfig>,

    /// Header transforms applied to successful responses.
    #[serde(default)]
    pub response_headers: Vec<HeaderRuleConfig>,
}

impl RouteConfig {
    /// Minimal route with defaults for everything but the essentials.
    pub fn new(id: impl Into<String>, path: impl Into<String>, upstream: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            methods: Vec::new(),
            host: None,
            headers: BTreeMap::new(),
            upstream: upstream.into(),
            timeout_ms: None,
            max_in_flight: None,
            idempotent: None,
            retry: None,
            response_headers: Vec::new(),
        }
    }
}

/// Action performed by a response header rule.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HeaderAction {
    Set,
    Append,
    Remove,
}

/// A single response header transform.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct HeaderRuleConfig {
    pub action: HeaderAction,
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

/// Load-balancing policy for an upstream.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingPolicy {
    #[default]
    RoundRobin,
    LeastInFlight,
}

/// Upstream service definition.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct UpstreamConfig {
    /// Unique upstream name referenced by routes.
    pub name: String,

    /// Endpoint addresses (e.g., "127.0.0.1:3000" or "orders.internal:8080").
    pub addresses: Vec<String>,

    /// Endpoint selection policy.
    #[serde(default)]
    pub load_balancing: LoadBalancingPolicy,

    /// Circuit breaker override for this upstream.
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl UpstreamConfig {
    pub fn new(name: impl Into<String>, addresses: Vec<String>) -> Self {
        Self {
            name: name.into(),
            addresses,
            load_balancing: LoadBalancingPolicy::default(),
            circuit_breaker: None,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Default per-attempt upstream timeout in milliseconds.
    pub upstream_ms: u64,

    /// Total time budget for one request, retries included, in milliseconds.
    pub request_deadline_ms: u64,
}

impl TimeoutConfig {
    pub fn upstream(&self) -> Duration {
        Duration::from_millis(self.upstream_ms)
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.request_deadline_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            upstream_ms: 5_000,
            request_deadline_ms: 30_000,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Random jitter added on top of the delay, as a fraction of it.
    pub jitter_ratio: f64,

    /// Fraction of requests that may be retries (retry budget).
    pub budget_ratio: f64,

    /// Retries always allowed by the budget regardless of traffic.
    pub budget_min_retries: u64,

    /// Length of the window the budget counts over, in seconds.
    pub budget_window_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 50,
            max_delay_ms: 1_000,
            jitter_ratio: 0.1,
            budget_ratio: 0.2,
            budget_min_retries: 10,
            budget_window_secs: 10,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// How long the circuit stays open before a trial request, in milliseconds.
    pub open_duration_ms: u64,
}

impl CircuitBreakerConfig {
    pub fn open_duration(&self) -> Duration {
        Duration::from_millis(self.open_duration_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration_ms: 30_000,
        }
    }
}

/// Admission control configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Per-route in-flight limit used when a route sets none (None = unbounded).
    pub default_max_in_flight: Option<usize>,

    /// Value of the Retry-After header on capacity rejections, in seconds.
    pub retry_after_secs: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            default_max_in_flight: None,
            retry_after_secs: 1,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Health check interval in seconds.
    pub interval_secs: u64,

    /// Health check timeout in milliseconds.
    pub timeout_ms: u64,

    /// Path to probe for HTTP health checks.
    pub path: String,

    /// Number of consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Number of consecutive successes before marking healthy.
    pub healthy_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 10,
            timeout_ms: 2_000,
            path: "/health".to_string(),
            unhealthy_threshold: 3,
            healthy_threshold: 2,
        }
    }
}

/// Outbound HTTP client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Idle pooled connections are closed after this many seconds.
    pub pool_idle_timeout_secs: u64,

    /// Maximum idle pooled connections per upstream host.
    pub pool_max_idle_per_host: usize,

    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Maximum buffered upstream response body in bytes.
    pub max_response_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            pool_idle_timeout_secs: 90,
            pool_max_idle_per_host: 32,
            connect_timeout_ms: 2_000,
            max_response_bytes: 8 * 1024 * 1024,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log line format.
    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:9901".to_string(),
        }
    }
}
