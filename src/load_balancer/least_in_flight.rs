//! Least-in-flight load balancing strategy.

use std::sync::Arc;

use crate::load_balancer::{endpoint::Endpoint, LoadBalancer};

/// Picks the eligible endpoint with the fewest in-flight requests.
/// Ties go to the first one declared.
#[derive(Debug, Default)]
pub struct LeastInFlight;

impl LeastInFlight {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastInFlight {
    fn select(&self, endpoints: &[Arc<Endpoint>]) -> Option<Arc<Endpoint>> {
        endpoints
            .iter()
            .filter(|ep| ep.is_eligible())
            .min_by_key(|ep| ep.in_flight())
            .cloned()
    }
}
