//! Structured gateway events.
//!
//! The core reports what it decided through an [`EventSink`] handed to each
//! component at construction. Shipping events to an external collector is
//! the embedder's job; [`TracingSink`] writes them as structured log lines.

use std::fmt::Debug;
use std::sync::Mutex;
use std::time::Duration;

use crate::resilience::circuit_breaker::CircuitState;

/// Something the gateway decided that an operator may want to see.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    RouteSelected {
        request_id: String,
        route_id: String,
        table_version: u64,
    },
    NoRouteMatched {
        request_id: String,
        method: String,
        path: String,
    },
    AdmissionRejected {
        route_id: String,
        limit: usize,
    },
    CircuitTransition {
        upstream: String,
        from: CircuitState,
        to: CircuitState,
    },
    RetryScheduled {
        request_id: String,
        route_id: String,
        attempt: u32,
        delay: Duration,
        reason: String,
    },
    TransformFailed {
        route_id: String,
        reason: String,
    },
    TablePublished {
        version: u64,
        routes: usize,
    },
    PublishRejected {
        reason: String,
    },
    EndpointHealthChanged {
        upstream: String,
        address: String,
        healthy: bool,
    },
}

/// Hook receiving gateway events. Implementations must not block.
pub trait EventSink: Send + Sync + Debug {
    fn emit(&self, event: &GatewayEvent);
}

/// Writes every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &GatewayEvent) {
        match event {
            GatewayEvent::RouteSelected {
                request_id,
                route_id,
                table_version,
            } => {
                tracing::debug!(request_id = %request_id, route_id = %route_id, table_version, "Route selected");
            }
            GatewayEvent::NoRouteMatched {
                request_id,
                method,
                path,
            } => {
                tracing::info!(request_id = %request_id, method = %method, path = %path, "No route matched");
            }
            GatewayEvent::AdmissionRejected { route_id, limit } => {
                tracing::warn!(route_id = %route_id, limit, "Admission rejected, route at capacity");
            }
            GatewayEvent::CircuitTransition { upstream, from, to } => {
                tracing::warn!(upstream = %upstream, from = %from, to = %to, "Circuit breaker state transition");
            }
            GatewayEvent::RetryScheduled {
                request_id,
                route_id,
                attempt,
                delay,
                reason,
            } => {
                tracing::info!(
                    request_id = %request_id,
                    route_id = %route_id,
                    attempt,
                    delay = ?delay,
                    reason = %reason,
                    "Retrying request"
                );
            }
            GatewayEvent::TransformFailed { route_id, reason } => {
                tracing::error!(route_id = %route_id, reason = %reason, "Response transform failed, passing response through");
            }
            GatewayEvent::TablePublished { version, routes } => {
                tracing::info!(version, routes, "Route table published");
            }
            GatewayEvent::PublishRejected { reason } => {
                tracing::error!(reason = %reason, "Route table rejected, keeping current version");
            }
            GatewayEvent::EndpointHealthChanged {
                upstream,
                address,
                healthy,
            } => {
                tracing::warn!(upstream = %upstream, address = %address, healthy, "Endpoint health changed");
            }
        }
    }
}

/// Keeps events in memory, for embedders that poll and for tests.
#[derive(Debug, Default)]
pub struct BufferedSink {
    events: Mutex<Vec<GatewayEvent>>,
}

impl BufferedSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    pub fn events(&self) -> Vec<GatewayEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Remove and return everything recorded so far.
    pub fn drain(&self) -> Vec<GatewayEvent> {
        self.events
            .lock()
            .map(|mut events| std::mem::take(&mut *events))
            .unwrap_or_default()
    }

    /// Number of recorded events satisfying `predicate`.
    pub fn count(&self, predicate: impl Fn(&GatewayEvent) -> bool) -> usize {
        self.events
            .lock()
            .map(|events| events.iter().filter(|e| predicate(e)).count())
            .unwrap_or(0)
    }
}

impl EventSink for BufferedSink {
    fn emit(&self, event: &GatewayEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
