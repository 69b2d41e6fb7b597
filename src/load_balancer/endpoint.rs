//! Upstream endpoint abstraction.
//!
//! # Responsibilities
//! - Represent a single upstream address
//! - Track in-flight requests (for least-in-flight selection)
//! - Track health state (Unknown/Healthy/Unhealthy) with hysteresis

use std::ops::Deref;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use url::Url;

/// Health state of an endpoint.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }
}

/// A single upstream address.
#[derive(Debug)]
pub struct Endpoint {
    /// Authority as configured ("host:port").
    pub address: String,
    /// Pre-parsed base URL used to rewrite outbound requests.
    pub base_url: Url,
    in_flight: AtomicUsize,
    state: AtomicU8,
    consecutive_failures: AtomicUsize,
    consecutive_successes: AtomicUsize,
}

impl Endpoint {
    /// Parse `address` as `host:port`.
    pub fn new(address: &str) -> Result<Self, String> {
        let base_url = Url::parse(&format!("http://{address}")).map_err(|e| e.to_string())?;
        if base_url.host_str().is_none() {
            return Err(format!("`{address}` has no host"));
        }
        if base_url.path() != "/" || base_url.query().is_some() {
            return Err(format!("`{address}` must be host:port without a path"));
        }
        Ok(Self {
            address: address.to_string(),
            base_url,
            in_flight: AtomicUsize::new(0),
            state: AtomicU8::new(HealthState::Unknown as u8),
            consecutive_failures: AtomicUsize::new(0),
            consecutive_successes: AtomicUsize::new(0),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn health(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Relaxed))
    }

    /// Healthy or Unknown endpoints receive traffic.
    pub fn is_eligible(&self) -> bool {
        self.health() != HealthState::Unhealthy
    }

    /// Count a request against this endpoint until the guard drops.
    pub fn acquire(self: &Arc<Self>) -> EndpointGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        EndpointGuard {
            endpoint: self.clone(),
        }
    }

    /// Record a success. Returns true if the endpoint just became healthy.
    pub fn mark_success(&self, healthy_threshold: u32) -> bool {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        if self.health() == HealthState::Healthy {
            return false;
        }
        let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
        if successes >= healthy_threshold as usize {
            self.consecutive_successes.store(0, Ordering::Relaxed);
            let previous = self.state.swap(HealthState::Healthy as u8, Ordering::Relaxed);
            return previous == HealthState::Unhealthy as u8;
        }
        false
    }

    /// Record a failure. Returns true if the endpoint just became unhealthy.
    pub fn mark_failure(&self, unhealthy_threshold: u32) -> bool {
        self.consecutive_successes.store(0, Ordering::Relaxed);
        if self.health() == HealthState::Unhealthy {
            return false;
        }
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= unhealthy_threshold as usize {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            let previous = self.state.swap(HealthState::Unhealthy as u8, Ordering::Relaxed);
            return previous != HealthState::Unhealthy as u8;
        }
        false
    }
}

/// RAII guard holding one in-flight slot on an endpoint.
#[derive(Debug)]
pub struct EndpointGuard {
    endpoint: Arc<Endpoint>,
}

impl EndpointGuard {
    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }
}

impl Deref for EndpointGuard {
    type Target = Endpoint;
    fn deref(&self) -> &Self::Target {
        &self.endpoint
    }
}

impl Drop for EndpointGuard {
    fn drop(&mut self) {
        self.endpoint.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
