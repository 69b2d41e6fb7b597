//! Compiled routes.
//!
//! A `Route` is built once from a parsed `RouteConfig` record and never
//! changes afterwards; a new configuration produces new routes and a new table.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{HeaderName, HeaderValue, Method, Request};

use crate::config::{GatewayConfig, HeaderRuleConfig, RouteConfig};
use crate::error::ConfigurationError;
use crate::load_balancer::UpstreamTarget;
use crate::resilience::RetryPolicy;
use crate::routing::matcher::{Condition, HeaderCondition, HostCondition, MethodCondition, PathPattern};

/// Precedence key, compared in descending order.
pub type Specificity = (u8, usize, usize);

/// A request predicate bound to an upstream and its policies.
#[derive(Debug)]
pub struct Route {
    pub id: String,
    pub pattern: PathPattern,
    conditions: Vec<Box<dyn Condition>>,
    pub upstream: Arc<UpstreamTarget>,
    /// Per-attempt upstream timeout.
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Concurrency limit; None means unbounded.
    pub max_in_flight: Option<usize>,
    /// Response header rules, checked when applied.
    pub response_headers: Vec<HeaderRuleConfig>,
}

impl Route {
    /// Compile a route record against the resolved upstream set.
    pub fn from_config(
        config: &RouteConfig,
        upstreams: &HashMap<String, Arc<UpstreamTarget>>,
        gateway: &GatewayConfig,
    ) -> Result<Self, ConfigurationError> {
        let malformed = |reason: String| ConfigurationError::MalformedPredicate {
            route: config.id.clone(),
            reason,
        };
        let invalid_policy = |reason: &str| ConfigurationError::InvalidPolicy {
            route: config.id.clone(),
            reason: reason.to_string(),
        };

        if config.id.trim().is_empty() {
            return Err(malformed("route id is empty".into()));
        }
        let pattern = PathPattern::parse(&config.path).map_err(|e| malformed(e.to_string()))?;

        let mut conditions: Vec<Box<dyn Condition>> = Vec::new();
        if !config.methods.is_empty() {
            let methods = config
                .methods
                .iter()
                .map(|m| {
                    Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                        .map_err(|_| malformed(format!("invalid method `{m}`")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            conditions.push(Box::new(MethodCondition::new(methods)));
        }
        if let Some(host) = &config.host {
            if host.trim().is_empty() {
                return Err(malformed("host constraint is empty".into()));
            }
            conditions.push(Box::new(HostCondition::new(host.trim())));
        }
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| malformed(format!("invalid header name `{name}`")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| malformed(format!("invalid value for header `{name}`")))?;
            conditions.push(Box::new(HeaderCondition::new(name, value)));
        }

        let upstream = upstreams.get(&config.upstream).cloned().ok_or_else(|| {
            ConfigurationError::UnknownUpstream {
                route: config.id.clone(),
                upstream: config.upstream.clone(),
            }
        })?;

        let timeout = config
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| gateway.timeouts.upstream());
        if timeout.is_zero() {
            return Err(invalid_policy("timeout must be greater than zero"));
        }

        let max_in_flight = config
            .max_in_flight
            .or(gateway.admission.default_max_in_flight);
        if max_in_flight == Some(0) {
            return Err(invalid_policy("max_in_flight must be greater than zero"));
        }

        let retry_config = config.retry.as_ref().unwrap_or(&gateway.retries);
        let retry = RetryPolicy::from_config(retry_config, config.idempotent);

        Ok(Self {
            id: config.id.clone(),
            pattern,
            conditions,
            upstream,
            timeout,
            retry,
            max_in_flight,
            response_headers: config.response_headers.clone(),
        })
    }

    /// Whether `req` satisfies the whole predicate.
    pub fn matches(&self, req: &Request<Bytes>) -> bool {
        self.pattern.matches(req.uri().path()) && self.conditions.iter().all(|c| c.matches(req))
    }

    /// Path specificity, then number of extra constraints.
    pub fn specificity(&self) -> Specificity {
        let (kind, len) = self.pattern.specificity();
        (kind, len, self.conditions.len())
    }
}

/// Compile every record, failing on the first invalid one.
pub fn compile_routes(
    configs: &[RouteConfig],
    upstreams: &HashMap<String, Arc<UpstreamTarget>>,
    gateway: &GatewayConfig,
) -> Result<Vec<Route>, ConfigurationError> {
    configs
        .iter()
        .map(|config| Route::from_config(config, upstreams, gateway))
        .collect()
}
