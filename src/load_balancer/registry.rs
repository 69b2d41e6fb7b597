//! Upstream registry.
//!
//! # Responsibilities
//! - Own the upstream targets referenced by the current route table
//! - Carry circuit and health state across route table versions
//! - Provide the full target list to the health monitor and admin API

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::{CircuitBreakerConfig, HealthCheckConfig, UpstreamConfig};
use crate::error::ConfigurationError;
use crate::load_balancer::upstream::{HealthThresholds, UpstreamTarget};
use crate::observability::EventSink;

/// Upstream targets keyed by name.
#[derive(Debug)]
pub struct UpstreamRegistry {
    targets: DashMap<String, Arc<UpstreamTarget>>,
    events: Arc<dyn EventSink>,
}

impl UpstreamRegistry {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            targets: DashMap::new(),
            events,
        }
    }

    /// Build the target set for `configs` without installing it.
    ///
    /// Targets whose definition is unchanged are reused, so their circuit and
    /// health state survive a reload.
    pub fn resolve(
        &self,
        configs: &[UpstreamConfig],
        default_breaker: &CircuitBreakerConfig,
        health: &HealthCheckConfig,
    ) -> Result<HashMap<String, Arc<UpstreamTarget>>, ConfigurationError> {
        let thresholds = HealthThresholds::from(health);
        let mut resolved = HashMap::with_capacity(configs.len());

        for config in configs {
            let reused = self
                .targets
                .get(&config.name)
                .filter(|t| t.is_defined_by(config, default_breaker, thresholds))
                .map(|t| t.value().clone());

            let target = match reused {
                Some(target) => target,
                None => Arc::new(UpstreamTarget::from_config(
                    config,
                    default_breaker,
                    thresholds,
                    self.events.clone(),
                )?),
            };

            if resolved.insert(config.name.clone(), target).is_some() {
                return Err(ConfigurationError::InvalidUpstream {
                    name: config.name.clone(),
                    reason: "defined more than once".into(),
                });
            }
        }
        Ok(resolved)
    }

    /// Install a resolved target set, dropping upstreams no longer defined.
    pub fn install(&self, resolved: HashMap<String, Arc<UpstreamTarget>>) {
        self.targets.retain(|name, _| resolved.contains_key(name));
        for (name, target) in resolved {
            self.targets.insert(name, target);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<UpstreamTarget>> {
        self.targets.get(name).map(|t| t.value().clone())
    }

    /// All targets, sorted by name.
    pub fn all(&self) -> Vec<Arc<UpstreamTarget>> {
        let mut all: Vec<_> = self.targets.iter().map(|t| t.value().clone()).collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }
}
