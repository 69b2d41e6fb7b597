//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::load_balancer::{endpoint::Endpoint, LoadBalancer};

/// Rotates through endpoints, skipping unhealthy ones.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn select(&self, endpoints: &[Arc<Endpoint>]) -> Option<Arc<Endpoint>> {
        if endpoints.is_empty() {
            return None;
        }
        let start = self.counter.fetch_add(1, Ordering::Relaxed);
        let len = endpoints.len();
        (0..len)
            .map(|i| &endpoints[(start + i) % len])
            .find(|ep| ep.is_eligible())
            .cloned()
    }
}
