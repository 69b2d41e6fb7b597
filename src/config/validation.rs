//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (routes reference existing upstreams)
//! - Validate value ranges (thresholds > 0, deadlines >= timeouts)
//! - Detect duplicate route ids and upstream names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system
//! - Path patterns are checked again when routes are compiled; this pass only
//!   reports them early so a bad file never reaches the route store

use std::collections::HashSet;

use thiserror::Error;

use crate::config::schema::{GatewayConfig, HeaderAction};
use crate::routing::PathPattern;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("duplicate route id `{0}`")]
    DuplicateRoute(String),

    #[error("duplicate upstream name `{0}`")]
    DuplicateUpstream(String),

    #[error("route `{route}` references unknown upstream `{upstream}`")]
    UnknownUpstream { route: String, upstream: String },

    #[error("route `{route}` has invalid path: {reason}")]
    InvalidPath { route: String, reason: String },

    #[error("route `{route}` header rule `{name}` needs a value")]
    MissingHeaderValue { route: String, name: String },

    #[error("upstream `{0}` has no addresses")]
    EmptyUpstream(String),

    #[error("{field} must be greater than zero")]
    NotPositive { field: String },
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let mut upstream_names = HashSet::new();
    for upstream in &config.upstreams {
        if !upstream_names.insert(upstream.name.as_str()) {
            errors.push(ValidationError::DuplicateUpstream(upstream.name.clone()));
        }
        if upstream.addresses.is_empty() {
            errors.push(ValidationError::EmptyUpstream(upstream.name.clone()));
        }
        if let Some(breaker) = &upstream.circuit_breaker {
            if breaker.failure_threshold == 0 {
                errors.push(ValidationError::NotPositive {
                    field: format!("upstreams.{}.circuit_breaker.failure_threshold", upstream.name),
                });
            }
        }
    }

    let mut route_ids = HashSet::new();
    for route in &config.routes {
        if !route_ids.insert(route.id.as_str()) {
            errors.push(ValidationError::DuplicateRoute(route.id.clone()));
        }
        if !upstream_names.contains(route.upstream.as_str()) {
            errors.push(ValidationError::UnknownUpstream {
                route: route.id.clone(),
                upstream: route.upstream.clone(),
            });
        }
        if let Err(e) = PathPattern::parse(&route.path) {
            errors.push(ValidationError::InvalidPath {
                route: route.id.clone(),
                reason: e.to_string(),
            });
        }
        if route.max_in_flight == Some(0) {
            errors.push(ValidationError::NotPositive {
                field: format!("routes.{}.max_in_flight", route.id),
            });
        }
        for rule in &route.response_headers {
            if rule.action != HeaderAction::Remove && rule.value.is_none() {
                errors.push(ValidationError::MissingHeaderValue {
                    route: route.id.clone(),
                    name: rule.name.clone(),
                });
            }
        }
    }

    if config.circuit_breaker.failure_threshold == 0 {
        errors.push(ValidationError::NotPositive {
            field: "circuit_breaker.failure_threshold".into(),
        });
    }
    if config.timeouts.upstream_ms == 0 {
        errors.push(ValidationError::NotPositive {
            field: "timeouts.upstream_ms".into(),
        });
    }
    if config.timeouts.request_deadline_ms == 0 {
        errors.push(ValidationError::NotPositive {
            field: "timeouts.request_deadline_ms".into(),
        });
    }
    if config.health_check.enabled && config.health_check.interval_secs == 0 {
        errors.push(ValidationError::NotPositive {
            field: "health_check.interval_secs".into(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{RouteConfig, UpstreamConfig};

    fn base() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config
            .upstreams
            .push(UpstreamConfig::new("orders", vec!["127.0.0.1:3000".into()]));
        config.routes.push(RouteConfig::new("orders", "/orders/*", "orders"));
        config
    }

    #[test]
    fn accepts_valid_config() {
        assert!(validate_config(&base()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = base();
        config.routes.push(RouteConfig::new("orders", "orders", "missing"));
        config.upstreams.push(UpstreamConfig::new("empty", vec![]));

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::DuplicateRoute("orders".into())));
        assert!(errors.contains(&ValidationError::UnknownUpstream {
            route: "orders".into(),
            upstream: "missing".into(),
        }));
        assert!(errors.contains(&ValidationError::EmptyUpstream("empty".into())));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidPath { .. })));
    }
}
