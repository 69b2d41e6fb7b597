//! Dispatch outcomes other than a usable upstream response.

use axum::body::Bytes;
use axum::http::{Response, StatusCode};
use thiserror::Error;

use crate::resilience::CircuitOpenError;

/// Why a request produced no usable upstream response.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The attempt timeout or the request deadline elapsed.
    #[error("upstream timed out")]
    Timeout,

    /// The upstream could not be reached or the exchange broke off.
    #[error("upstream connection failed: {0}")]
    ConnectionFailure(String),

    /// The upstream answered with a server error.
    #[error("upstream returned {status}")]
    UpstreamError {
        status: StatusCode,
        response: Response<Bytes>,
    },

    /// The upstream's circuit refused the call; nothing was sent.
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    /// Every endpoint of the upstream is unhealthy.
    #[error("no healthy endpoint for upstream `{upstream}`")]
    NoHealthyEndpoint { upstream: String },
}

impl DispatchError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DispatchError::Timeout
                | DispatchError::ConnectionFailure(_)
                | DispatchError::UpstreamError { .. }
        )
    }

    /// Short label for logs and retry events.
    pub fn reason(&self) -> String {
        match self {
            DispatchError::Timeout => "timeout".into(),
            DispatchError::ConnectionFailure(_) => "connection_failure".into(),
            DispatchError::UpstreamError { status, .. } => format!("status_{}", status.as_u16()),
            DispatchError::CircuitOpen(_) => "circuit_open".into(),
            DispatchError::NoHealthyEndpoint { .. } => "no_healthy_endpoint".into(),
        }
    }
}
