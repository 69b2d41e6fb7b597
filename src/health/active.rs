//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe endpoints
//! - Update endpoint health state based on results

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{header, HeaderValue, Request};
use futures_util::future::join_all;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::dispatch::UpstreamClient;
use crate::gateway::Gateway;
use crate::load_balancer::{Endpoint, UpstreamTarget};

pub struct HealthMonitor {
    gateway: Arc<Gateway>,
    client: Arc<dyn UpstreamClient>,
}

impl HealthMonitor {
    pub fn new(gateway: Arc<Gateway>, client: Arc<dyn UpstreamClient>) -> Self {
        Self { gateway, client }
    }

    /// Probe on the current interval until shutdown.
    ///
    /// The health section is re-read every tick, so a reload can switch
    /// checks on or off and change the interval or path.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut enabled = None;
        loop {
            let config = self.gateway.health_check();
            if enabled != Some(config.enabled) {
                if config.enabled {
                    tracing::info!(interval = config.interval_secs, path = %config.path, "Active health checks enabled");
                } else {
                    tracing::info!("Active health checks disabled");
                }
                enabled = Some(config.enabled);
            }
            if config.enabled {
                self.check_all().await;
            }

            tokio::select! {
                _ = time::sleep(Duration::from_secs(config.interval_secs.max(1))) => {}
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every endpoint once, concurrently.
    pub async fn check_all(&self) {
        let config = self.gateway.health_check();
        let upstreams = self.gateway.registry().all();
        let probes = upstreams.iter().flat_map(|upstream| {
            let config = &config;
            upstream
                .endpoints()
                .iter()
                .map(move |endpoint| self.probe(config, upstream, endpoint))
        });
        join_all(probes).await;
    }

    async fn probe(&self, config: &HealthCheckConfig, upstream: &UpstreamTarget, endpoint: &Endpoint) {
        let uri = format!("http://{}{}", endpoint.address, config.path);
        let request = match Request::builder()
            .method("GET")
            .uri(uri)
            .header(header::USER_AGENT, HeaderValue::from_static("api-gateway-health-check"))
            .body(Bytes::new())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(endpoint = %endpoint.address, error = %e, "Failed to build health check request");
                return;
            }
        };

        let timeout = Duration::from_millis(config.timeout_ms);
        let healthy = match self.client.send(request, timeout).await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::warn!(upstream = %upstream.name(), endpoint = %endpoint.address, status = %response.status(), "Health check failed: non-success status");
                false
            }
            Err(e) => {
                tracing::warn!(upstream = %upstream.name(), endpoint = %endpoint.address, error = %e, "Health check failed");
                false
            }
        };
        upstream.report(endpoint, healthy);
    }
}
