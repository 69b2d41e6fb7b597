//! The request pipeline, independent of any listener.
//!
//! # Data Flow
//! ```text
//! Request<Bytes>
//!     → RouteStore::lookup (snapshot kept for the whole request)
//!     → Matcher (NoMatch → 404)
//!     → AdmissionController::admit (Rejected → 503)
//!     → Dispatcher::dispatch (breaker, balancer, retries)
//!     → ResponsePipeline::shape
//!     → Response<Body>
//! ```
//!
//! # Design Decisions
//! - Matching runs before admission because limits are per route
//! - The lease lives until the response is shaped, so a cancelled handler
//!   frees its slot through `Drop`
//! - Reload resolves upstreams and compiles routes completely before
//!   anything is swapped; a failed reload changes nothing

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::body::{Body, Bytes};
use axum::http::{Request, Response};

use crate::admission::AdmissionController;
use crate::config::{GatewayConfig, HealthCheckConfig};
use crate::dispatch::{Dispatcher, InFlightRequest, UpstreamClient};
use crate::error::ConfigurationError;
use crate::http::request::request_id;
use crate::http::response::{Outcome, ResponsePipeline};
use crate::load_balancer::UpstreamRegistry;
use crate::observability::{EventSink, GatewayEvent};
use crate::resilience::RetryBudget;
use crate::routing::{compile_routes, RouteMatch, RouteStore};

/// Routing, admission, dispatch and response shaping behind one call.
#[derive(Debug)]
pub struct Gateway {
    routes: RouteStore,
    registry: UpstreamRegistry,
    admission: AdmissionController,
    dispatcher: Dispatcher,
    pipeline: ResponsePipeline,
    request_deadline_ms: AtomicU64,
    health_check: ArcSwap<HealthCheckConfig>,
    events: Arc<dyn EventSink>,
}

impl Gateway {
    /// Build a gateway and publish the first route table from `config`.
    pub fn new(
        config: &GatewayConfig,
        client: Arc<dyn UpstreamClient>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, ConfigurationError> {
        let budget = Arc::new(RetryBudget::from_config(&config.retries));
        let gateway = Self {
            routes: RouteStore::new(events.clone()),
            registry: UpstreamRegistry::new(events.clone()),
            admission: AdmissionController::new(
                Duration::from_secs(config.admission.retry_after_secs),
                events.clone(),
            ),
            dispatcher: Dispatcher::new(client, budget, events.clone()),
            pipeline: ResponsePipeline::new(events.clone()),
            request_deadline_ms: AtomicU64::new(config.timeouts.request_deadline_ms),
            health_check: ArcSwap::from_pointee(config.health_check.clone()),
            events,
        };
        gateway.reload(config)?;
        Ok(gateway)
    }

    /// Publish a new route table built from `config`. Returns its version.
    ///
    /// On error the active table, upstreams and settings are left as they were.
    pub fn reload(&self, config: &GatewayConfig) -> Result<u64, ConfigurationError> {
        let resolved = self
            .registry
            .resolve(&config.upstreams, &config.circuit_breaker, &config.health_check)
            .and_then(|upstreams| {
                compile_routes(&config.routes, &upstreams, config).map(|routes| (upstreams, routes))
            });
        let (upstreams, routes) = match resolved {
            Ok(ok) => ok,
            Err(e) => {
                self.routes.reject(&e);
                return Err(e);
            }
        };

        let version = self.routes.publish(routes)?;
        self.registry.install(upstreams);
        self.admission
            .retain_routes(config.routes.iter().map(|r| r.id.as_str()));
        self.admission
            .set_retry_after(Duration::from_secs(config.admission.retry_after_secs));
        self.request_deadline_ms
            .store(config.timeouts.request_deadline_ms, Ordering::Relaxed);
        self.health_check.store(Arc::new(config.health_check.clone()));
        Ok(version)
    }

    /// Run one request through the pipeline. Never fails: every outcome is a response.
    pub async fn handle(&self, request: Request<Bytes>) -> Response<Body> {
        let request_id = request_id(&request);
        let table = self.routes.lookup();

        let route = match table.match_request(&request) {
            RouteMatch::Matched(route) => route,
            RouteMatch::NoMatch => {
                self.events.emit(&GatewayEvent::NoRouteMatched {
                    request_id: request_id.clone(),
                    method: request.method().to_string(),
                    path: request.uri().path().to_string(),
                });
                return self.pipeline.shape(Outcome::NoMatch, &request_id);
            }
        };
        self.events.emit(&GatewayEvent::RouteSelected {
            request_id: request_id.clone(),
            route_id: route.id.clone(),
            table_version: table.version(),
        });

        let _lease = match self.admission.admit(&route) {
            Ok(lease) => lease,
            Err(rejected) => return self.pipeline.shape(Outcome::Rejected(rejected), &request_id),
        };

        let deadline = Duration::from_millis(self.request_deadline_ms.load(Ordering::Relaxed));
        let mut flight = InFlightRequest::new(request_id.as_str(), route.id.as_str(), deadline);
        let result = self.dispatcher.dispatch(&route, &mut flight, request).await;

        tracing::debug!(
            request_id = %request_id,
            route_id = %route.id,
            retries = flight.retries,
            elapsed = ?flight.elapsed(),
            ok = result.is_ok(),
            "Request dispatched"
        );
        self.pipeline
            .shape(Outcome::Dispatched { route, result }, &request_id)
    }

    pub fn routes(&self) -> &RouteStore {
        &self.routes
    }

    pub fn registry(&self) -> &UpstreamRegistry {
        &self.registry
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// Health check settings of the last applied configuration.
    pub fn health_check(&self) -> Arc<HealthCheckConfig> {
        self.health_check.load_full()
    }
}
