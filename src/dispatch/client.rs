//! Outbound HTTP client seam.
//!
//! The dispatcher only sees [`UpstreamClient`]; production wires in
//! [`HyperUpstreamClient`], tests wire in scripted fakes.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{Request, Response};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;

use crate::config::ClientConfig;

/// Failure of a single exchange with an upstream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("timed out")]
    Timeout,
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Sends one buffered request to an upstream.
#[async_trait]
pub trait UpstreamClient: Send + Sync + Debug {
    /// Send `request` (absolute URI) and buffer the response, giving up after `timeout`.
    async fn send(
        &self,
        request: Request<Bytes>,
        timeout: Duration,
    ) -> Result<Response<Bytes>, SendError>;
}

/// Pooled HTTP/1.1 client built on hyper-util.
#[derive(Debug, Clone)]
pub struct HyperUpstreamClient {
    client: Client<HttpConnector, Body>,
    max_response_bytes: usize,
}

impl HyperUpstreamClient {
    pub fn from_config(config: &ClientConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_millis(config.connect_timeout_ms)));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build(connector);

        Self {
            client,
            max_response_bytes: config.max_response_bytes,
        }
    }

    async fn exchange(&self, request: Request<Bytes>) -> Result<Response<Bytes>, SendError> {
        let response = self
            .client
            .request(request.map(Body::from))
            .await
            .map_err(|e| {
                if e.is_connect() {
                    SendError::Connect(e.to_string())
                } else {
                    SendError::Protocol(e.to_string())
                }
            })?;

        let (parts, body) = response.into_parts();
        let bytes = axum::body::to_bytes(Body::new(body), self.max_response_bytes)
            .await
            .map_err(|e| SendError::Protocol(e.to_string()))?;
        Ok(Response::from_parts(parts, bytes))
    }
}

#[async_trait]
impl UpstreamClient for HyperUpstreamClient {
    async fn send(
        &self,
        request: Request<Bytes>,
        timeout: Duration,
    ) -> Result<Response<Bytes>, SendError> {
        tokio::time::timeout(timeout, self.exchange(request))
            .await
            .map_err(|_| SendError::Timeout)?
    }
}
