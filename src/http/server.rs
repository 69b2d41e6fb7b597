//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the gateway handler
//! - Wire up middleware (tracing, panic recovery, body limit, request ID)
//! - Bind server to listener
//! - Apply configuration reloads
//! - Run the health monitor and admin API alongside the proxy listener

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use axum::{
    body::{Body, Bytes},
    extract::{rejection::BytesRejection, DefaultBodyLimit, State},
    http::{header, Extensions, HeaderMap, HeaderValue, Method, Request, Response, StatusCode, Uri, Version},
    Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::ServiceBuilder;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::admin::setup_admin_router;
use crate::config::GatewayConfig;
use crate::dispatch::{HyperUpstreamClient, UpstreamClient};
use crate::error::ConfigurationError;
use crate::gateway::Gateway;
use crate::health::HealthMonitor;
use crate::http::request::{propagate_request_id_layer, request_id, set_request_id_layer, X_REQUEST_ID};
use crate::http::response::error_response;
use crate::observability::{EventSink, TracingSink};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    /// Last configuration that was applied successfully.
    pub config: Arc<ArcSwap<GatewayConfig>>,
    pub started_at: Instant,
}

/// HTTP front end of the gateway.
pub struct HttpServer {
    state: AppState,
    client: Arc<dyn UpstreamClient>,
}

impl HttpServer {
    /// Create a server with a pooled HTTP client and tracing-backed events.
    pub fn new(config: GatewayConfig) -> Result<Self, ConfigurationError> {
        let client: Arc<dyn UpstreamClient> = Arc::new(HyperUpstreamClient::from_config(&config.client));
        Self::with_client(config, client, Arc::new(TracingSink))
    }

    pub fn with_client(
        config: GatewayConfig,
        client: Arc<dyn UpstreamClient>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, ConfigurationError> {
        let gateway = Arc::new(Gateway::new(&config, client.clone(), events)?);
        Ok(Self::with_gateway(config, gateway, client))
    }

    /// Serve an already built gateway. `client` is used for health probes.
    pub fn with_gateway(
        config: GatewayConfig,
        gateway: Arc<Gateway>,
        client: Arc<dyn UpstreamClient>,
    ) -> Self {
        Self {
            state: AppState {
                gateway,
                config: Arc::new(ArcSwap::from_pointee(config)),
                started_at: Instant::now(),
            },
            client,
        }
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.state.gateway
    }

    /// Build the Axum router with all middleware layers.
    pub fn router(&self) -> Router {
        let max_body = self.state.config.load().listener.max_body_bytes;
        Router::new()
            .fallback(gateway_handler)
            .with_state(self.state.clone())
            .layer(DefaultBodyLimit::max(max_body))
            .layer(
                ServiceBuilder::new()
                    .layer(set_request_id_layer())
                    .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
                        let id = req
                            .headers()
                            .get(X_REQUEST_ID)
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("unknown");
                        tracing::info_span!(
                            "request",
                            method = %req.method(),
                            uri = %req.uri(),
                            request_id = %id,
                        )
                    }))
                    .layer(propagate_request_id_layer())
                    .layer(CatchPanicLayer::custom(panic_response)),
            )
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires. Configurations received on `config_updates` are
    /// published as new route tables.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        let config = self.state.config.load_full();
        tracing::info!(address = %addr, routes = config.routes.len(), "HTTP server starting");

        let monitor = HealthMonitor::new(self.state.gateway.clone(), self.client.clone());
        tokio::spawn(monitor.run(shutdown.resubscribe()));

        tokio::spawn(apply_updates(
            self.state.clone(),
            config_updates,
            shutdown.resubscribe(),
        ));

        if config.admin.enabled {
            let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
            tracing::info!(address = %admin_listener.local_addr()?, "Admin API listening");
            let admin = setup_admin_router(self.state.clone());
            let mut admin_shutdown = shutdown.resubscribe();
            tokio::spawn(async move {
                let served = axum::serve(admin_listener, admin)
                    .with_graceful_shutdown(async move {
                        let _ = admin_shutdown.recv().await;
                    })
                    .await;
                if let Err(e) = served {
                    tracing::error!(error = %e, "Admin API stopped with error");
                }
            });
        }

        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> Arc<GatewayConfig> {
        self.state.config.load_full()
    }
}

/// Publish each received configuration until shutdown.
async fn apply_updates(
    state: AppState,
    mut updates: mpsc::UnboundedReceiver<GatewayConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(config) = update else { break };
                match state.gateway.reload(&config) {
                    Ok(version) => {
                        tracing::info!(version, routes = config.routes.len(), "Configuration reloaded");
                        state.config.store(Arc::new(config));
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Configuration reload rejected, keeping current routes");
                    }
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

/// Catch-all handler: buffer the request and hand it to the gateway.
async fn gateway_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    extensions: Extensions,
    body: Result<Bytes, BytesRejection>,
) -> Response<Body> {
    let mut request = Request::new(Bytes::new());
    *request.method_mut() = method;
    *request.uri_mut() = uri;
    *request.version_mut() = version;
    *request.headers_mut() = headers;
    *request.extensions_mut() = extensions;

    match body {
        Ok(bytes) => {
            *request.body_mut() = bytes;
            state.gateway.handle(request).await
        }
        Err(rejection) => {
            let id = request_id(&request);
            let status = rejection.status();
            tracing::warn!(request_id = %id, status = %status, reason = %rejection.body_text(), "Request body rejected");
            let message = if status == StatusCode::PAYLOAD_TOO_LARGE {
                "request body too large"
            } else {
                "failed to read request body"
            };
            error_response(status, message, &id, None)
        }
    }
}

fn panic_response(err: Box<dyn std::any::Any + Send + 'static>) -> Response<Body> {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = %detail, "Request handler panicked");
    // The request id header is filled in by the propagate layer above.
    let mut response = Response::new(Body::from(json!({ "error": "internal error" }).to_string()));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}
