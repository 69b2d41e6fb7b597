//! Per-route concurrency limits.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;

use crate::observability::{EventSink, GatewayEvent};
use crate::routing::Route;

/// Sentinel for "no limit" in [`RouteSlots::limit`].
const UNBOUNDED: usize = usize::MAX;

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// The route is at capacity.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("route `{route_id}` is at its limit of {limit} in-flight requests")]
pub struct Rejected {
    pub route_id: String,
    pub limit: usize,
    /// Hint for the client's Retry-After header.
    pub retry_after: Duration,
}

/// Counters for one route.
#[derive(Debug)]
struct RouteSlots {
    in_flight: AtomicUsize,
    limit: AtomicUsize,
    admitted: AtomicU64,
    released: AtomicU64,
    rejected: AtomicU64,
}

impl RouteSlots {
    fn new() -> Self {
        Self {
            in_flight: AtomicUsize::new(0),
            limit: AtomicUsize::new(UNBOUNDED),
            admitted: AtomicU64::new(0),
            released: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Take a slot if one is free.
    fn try_take(&self) -> bool {
        let limit = self.limit.load(Ordering::Acquire);
        let mut current = self.in_flight.load(Ordering::Acquire);
        loop {
            if current >= limit {
                return false;
            }
            match self.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

/// A held admission slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct Lease {
    route_id: String,
    slots: Arc<RouteSlots>,
}

impl Lease {
    pub fn route_id(&self) -> &str {
        &self.route_id
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.slots.released.fetch_add(1, Ordering::Relaxed);
        self.slots.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Point-in-time counters for one route.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AdmissionStats {
    pub route_id: String,
    pub in_flight: usize,
    /// None when the route is unbounded.
    pub limit: Option<usize>,
    pub admitted: u64,
    pub released: u64,
    pub rejected: u64,
}

/// Gatekeeper bounding concurrent requests per route.
#[derive(Debug)]
pub struct AdmissionController {
    routes: DashMap<String, Arc<RouteSlots>>,
    retry_after_ms: AtomicU64,
    events: Arc<dyn EventSink>,
}

impl AdmissionController {
    pub fn new(retry_after: Duration, events: Arc<dyn EventSink>) -> Self {
        Self {
            routes: DashMap::new(),
            retry_after_ms: AtomicU64::new(duration_ms(retry_after)),
            events,
        }
    }

    /// Change the Retry-After hint given to rejected requests.
    pub fn set_retry_after(&self, retry_after: Duration) {
        self.retry_after_ms
            .store(duration_ms(retry_after), Ordering::Relaxed);
    }

    fn slots(&self, route_id: &str) -> Arc<RouteSlots> {
        if let Some(slots) = self.routes.get(route_id) {
            return slots.value().clone();
        }
        self.routes
            .entry(route_id.to_string())
            .or_insert_with(|| Arc::new(RouteSlots::new()))
            .value()
            .clone()
    }

    /// Take a slot on `route`, or reject immediately if it is full.
    pub fn admit(&self, route: &Route) -> Result<Lease, Rejected> {
        let slots = self.slots(&route.id);
        // The compiled route carries the current limit; a reload may have changed it.
        slots
            .limit
            .store(route.max_in_flight.unwrap_or(UNBOUNDED), Ordering::Release);

        if slots.try_take() {
            slots.admitted.fetch_add(1, Ordering::Relaxed);
            return Ok(Lease {
                route_id: route.id.clone(),
                slots,
            });
        }

        slots.rejected.fetch_add(1, Ordering::Relaxed);
        let limit = route.max_in_flight.unwrap_or(UNBOUNDED);
        self.events.emit(&GatewayEvent::AdmissionRejected {
            route_id: route.id.clone(),
            limit,
        });
        Err(Rejected {
            route_id: route.id.clone(),
            limit,
            retry_after: Duration::from_millis(self.retry_after_ms.load(Ordering::Relaxed)),
        })
    }

    /// Forget counters for routes that are gone and have nothing in flight.
    pub fn retain_routes<'a>(&self, live: impl IntoIterator<Item = &'a str>) {
        let live: std::collections::HashSet<&str> = live.into_iter().collect();
        self.routes.retain(|id, slots| {
            live.contains(id.as_str()) || slots.in_flight.load(Ordering::Acquire) > 0
        });
    }

    pub fn stats(&self, route_id: &str) -> Option<AdmissionStats> {
        self.routes
            .get(route_id)
            .map(|slots| Self::snapshot(route_id, &slots))
    }

    /// Counters for every known route, sorted by route id.
    pub fn all_stats(&self) -> Vec<AdmissionStats> {
        let mut all: Vec<_> = self
            .routes
            .iter()
            .map(|entry| Self::snapshot(entry.key(), entry.value()))
            .collect();
        all.sort_by(|a, b| a.route_id.cmp(&b.route_id));
        all
    }

    fn snapshot(route_id: &str, slots: &RouteSlots) -> AdmissionStats {
        let limit = slots.limit.load(Ordering::Acquire);
        AdmissionStats {
            route_id: route_id.to_string(),
            in_flight: slots.in_flight.load(Ordering::Acquire),
            limit: (limit != UNBOUNDED).then_some(limit),
            admitted: slots.admitted.load(Ordering::Relaxed),
            released: slots.released.load(Ordering::Relaxed),
            rejected: slots.rejected.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::config::{GatewayConfig, HealthCheckConfig, RouteConfig, UpstreamConfig};
    use crate::load_balancer::{UpstreamRegistry, UpstreamTarget};
    use crate::observability::BufferedSink;

    fn upstreams() -> HashMap<String, Arc<UpstreamTarget>> {
        UpstreamRegistry::new(Arc::new(BufferedSink::new()))
            .resolve(
                &[UpstreamConfig::new("svc", vec!["127.0.0.1:3000".into()])],
                &Default::default(),
                &HealthCheckConfig::default(),
            )
            .unwrap()
    }

    fn route(limit: Option<usize>) -> Route {
        let mut config = RouteConfig::new("orders", "/orders/*", "svc");
        config.max_in_flight = limit;
        Route::from_config(&config, &upstreams(), &GatewayConfig::default()).unwrap()
    }

    fn controller(sink: Arc<BufferedSink>) -> AdmissionController {
        AdmissionController::new(Duration::from_secs(1), sink)
    }

    #[test]
    fn rejects_when_full_and_frees_on_drop() {
        let sink = Arc::new(BufferedSink::new());
        let admission = controller(sink.clone());
        let route = route(Some(2));

        let a = admission.admit(&route).unwrap();
        let _b = admission.admit(&route).unwrap();
        let rejected = admission.admit(&route).unwrap_err();
        assert_eq!(rejected.limit, 2);
        assert_eq!(rejected.retry_after, Duration::from_secs(1));
        assert_eq!(
            sink.count(|e| matches!(e, GatewayEvent::AdmissionRejected { .. })),
            1
        );

        drop(a);
        let _c = admission.admit(&route).unwrap();

        let stats = admission.stats("orders").unwrap();
        assert_eq!(stats.in_flight, 2);
        assert_eq!(stats.admitted, 3);
        assert_eq!(stats.released, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.limit, Some(2));
    }

    #[test]
    fn unbounded_route_always_admits() {
        let admission = controller(Arc::new(BufferedSink::new()));
        let route = route(None);
        let leases: Vec<_> = (0..1000).map(|_| admission.admit(&route).unwrap()).collect();
        assert_eq!(admission.stats("orders").unwrap().in_flight, 1000);
        assert_eq!(admission.stats("orders").unwrap().limit, None);
        drop(leases);
        assert_eq!(admission.stats("orders").unwrap().in_flight, 0);
    }

    #[test]
    fn counters_balance_under_contention() {
        let admission = Arc::new(controller(Arc::new(BufferedSink::new())));
        let route = Arc::new(route(Some(4)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let admission = admission.clone();
                let route = route.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        if let Ok(lease) = admission.admit(&route) {
                            let stats = admission.stats("orders").unwrap();
                            assert!(stats.in_flight <= 4);
                            drop(lease);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = admission.stats("orders").unwrap();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.admitted, stats.released);
        assert_eq!(stats.admitted + stats.rejected, 8 * 500);
    }

    #[test]
    fn retain_keeps_routes_with_work_in_flight() {
        let admission = controller(Arc::new(BufferedSink::new()));
        let lease = admission.admit(&route(Some(1))).unwrap();

        admission.retain_routes(std::iter::empty());
        assert!(admission.stats("orders").is_some());

        drop(lease);
        admission.retain_routes(std::iter::empty());
        assert!(admission.stats("orders").is_none());
    }
}
