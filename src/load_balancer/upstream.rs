//! Upstream target: an endpoint set, its selection policy and its circuit.

use std::sync::Arc;

use serde::Serialize;

use crate::config::{CircuitBreakerConfig, HealthCheckConfig, LoadBalancingPolicy, UpstreamConfig};
use crate::error::ConfigurationError;
use crate::load_balancer::endpoint::{Endpoint, EndpointGuard, HealthState};
use crate::load_balancer::{least_in_flight::LeastInFlight, round_robin::RoundRobin, LoadBalancer};
use crate::observability::{EventSink, GatewayEvent};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitSnapshot};

/// Consecutive outcomes needed to flip an endpoint's health.
///
/// With `tracking` off endpoints stay eligible: nothing would probe an
/// evicted endpoint back in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthThresholds {
    pub tracking: bool,
    pub healthy: u32,
    pub unhealthy: u32,
}

impl From<&HealthCheckConfig> for HealthThresholds {
    fn from(config: &HealthCheckConfig) -> Self {
        Self {
            tracking: config.enabled,
            healthy: config.healthy_threshold.max(1),
            unhealthy: config.unhealthy_threshold.max(1),
        }
    }
}

/// A named set of endpoints behind one circuit breaker.
#[derive(Debug)]
pub struct UpstreamTarget {
    name: String,
    endpoints: Vec<Arc<Endpoint>>,
    balancer: Box<dyn LoadBalancer>,
    breaker: Arc<CircuitBreaker>,
    thresholds: HealthThresholds,
    events: Arc<dyn EventSink>,
    /// Definition this target was built from, used to reuse it across reloads.
    definition: (UpstreamConfig, CircuitBreakerConfig),
}

impl UpstreamTarget {
    pub fn from_config(
        config: &UpstreamConfig,
        default_breaker: &CircuitBreakerConfig,
        thresholds: HealthThresholds,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, ConfigurationError> {
        if config.addresses.is_empty() {
            return Err(ConfigurationError::InvalidUpstream {
                name: config.name.clone(),
                reason: "no addresses".into(),
            });
        }
        let endpoints = config
            .addresses
            .iter()
            .map(|addr| {
                Endpoint::new(addr).map(Arc::new).map_err(|reason| {
                    ConfigurationError::InvalidUpstream {
                        name: config.name.clone(),
                        reason,
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let breaker_config = config
            .circuit_breaker
            .clone()
            .unwrap_or_else(|| default_breaker.clone());
        if breaker_config.failure_threshold == 0 {
            return Err(ConfigurationError::InvalidUpstream {
                name: config.name.clone(),
                reason: "circuit breaker failure_threshold must be > 0".into(),
            });
        }

        let balancer: Box<dyn LoadBalancer> = match config.load_balancing {
            LoadBalancingPolicy::RoundRobin => Box::new(RoundRobin::new()),
            LoadBalancingPolicy::LeastInFlight => Box::new(LeastInFlight::new()),
        };

        Ok(Self {
            name: config.name.clone(),
            endpoints,
            balancer,
            breaker: Arc::new(CircuitBreaker::new(&config.name, &breaker_config, events.clone())),
            thresholds,
            events,
            definition: (config.clone(), breaker_config),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Whether this target was built from exactly this definition.
    pub fn is_defined_by(
        &self,
        config: &UpstreamConfig,
        default_breaker: &CircuitBreakerConfig,
        thresholds: HealthThresholds,
    ) -> bool {
        let breaker = config.circuit_breaker.as_ref().unwrap_or(default_breaker);
        self.definition.0 == *config && self.definition.1 == *breaker && self.thresholds == thresholds
    }

    /// Pick an endpoint with the configured policy and hold an in-flight slot on it.
    pub fn select(&self) -> Option<EndpointGuard> {
        self.balancer.select(&self.endpoints).map(|ep| ep.acquire())
    }

    /// Feed a request or probe outcome into the endpoint's health state.
    pub fn report(&self, endpoint: &Endpoint, success: bool) {
        if !self.thresholds.tracking {
            return;
        }
        let changed = if success {
            endpoint.mark_success(self.thresholds.healthy)
        } else {
            endpoint.mark_failure(self.thresholds.unhealthy)
        };
        if changed {
            self.events.emit(&GatewayEvent::EndpointHealthChanged {
                upstream: self.name.clone(),
                address: endpoint.address.clone(),
                healthy: success,
            });
        }
    }

    pub fn snapshot(&self) -> UpstreamSnapshot {
        UpstreamSnapshot {
            name: self.name.clone(),
            circuit: self.breaker.snapshot(),
            endpoints: self
                .endpoints
                .iter()
                .map(|ep| EndpointSnapshot {
                    address: ep.address.clone(),
                    health: ep.health(),
                    in_flight: ep.in_flight(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointSnapshot {
    pub address: String,
    pub health: HealthState,
    pub in_flight: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpstreamSnapshot {
    pub name: String,
    pub circuit: CircuitSnapshot,
    pub endpoints: Vec<EndpointSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::BufferedSink;

    fn thresholds() -> HealthThresholds {
        HealthThresholds {
            tracking: true,
            healthy: 1,
            unhealthy: 1,
        }
    }

    #[test]
    fn rejects_bad_addresses() {
        let config = UpstreamConfig::new("bad", vec!["127.0.0.1:1/x".into()]);
        let err = UpstreamTarget::from_config(
            &config,
            &CircuitBreakerConfig::default(),
            thresholds(),
            Arc::new(BufferedSink::new()),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidUpstream { .. }));
    }

    #[test]
    fn report_emits_health_transitions() {
        let sink = Arc::new(BufferedSink::new());
        let config = UpstreamConfig::new("orders", vec!["127.0.0.1:3000".into()]);
        let target = UpstreamTarget::from_config(
            &config,
            &CircuitBreakerConfig::default(),
            thresholds(),
            sink.clone(),
        )
        .unwrap();

        let guard = target.select().unwrap();
        target.report(&guard, false);
        assert!(target.select().is_none());
        target.report(&guard, true);

        assert_eq!(
            sink.count(|e| matches!(e, GatewayEvent::EndpointHealthChanged { .. })),
            2
        );
        assert!(target.is_defined_by(&config, &CircuitBreakerConfig::default(), thresholds()));
    }

    #[test]
    fn report_is_ignored_without_tracking() {
        let target = UpstreamTarget::from_config(
            &UpstreamConfig::new("orders", vec!["127.0.0.1:3000".into()]),
            &CircuitBreakerConfig::default(),
            HealthThresholds {
                tracking: false,
                ..thresholds()
            },
            Arc::new(BufferedSink::new()),
        )
        .unwrap();

        let guard = target.select().unwrap();
        target.report(&guard, false);
        assert!(target.select().is_some());
    }
}
