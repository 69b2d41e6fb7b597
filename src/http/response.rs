//! Response shaping.
//!
//! # Responsibilities
//! - Map every request outcome to exactly one client response
//! - Apply per-route response header transforms
//! - Strip hop-by-hop headers and attach `x-request-id`
//!
//! # Design Decisions
//! - Upstream timeouts result in 504 Gateway Timeout, other upstream faults in 502
//! - Transforms are applied to a copy and swapped in only when every rule
//!   applied; a bad rule leaves the upstream response untouched
//! - Error bodies are small JSON documents carrying the request id

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use serde_json::json;
use thiserror::Error;

use crate::admission::Rejected;
use crate::config::{HeaderAction, HeaderRuleConfig};
use crate::dispatch::DispatchError;
use crate::http::headers::strip_hop_by_hop;
use crate::http::request::X_REQUEST_ID;
use crate::observability::{EventSink, GatewayEvent};
use crate::routing::Route;

/// Everything a request can end in.
#[derive(Debug)]
pub enum Outcome {
    NoMatch,
    Rejected(Rejected),
    Dispatched {
        route: Arc<Route>,
        result: Result<Response<Bytes>, DispatchError>,
    },
}

/// A header rule that cannot be applied.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("invalid header name `{0}`")]
    InvalidName(String),
    #[error("header `{0}` needs a valid value")]
    InvalidValue(String),
}

/// Apply `rules` in order to a copy of `headers`.
pub fn apply_header_rules(
    headers: &HeaderMap,
    rules: &[HeaderRuleConfig],
) -> Result<HeaderMap, TransformError> {
    let mut out = headers.clone();
    for rule in rules {
        let name = HeaderName::from_bytes(rule.name.as_bytes())
            .map_err(|_| TransformError::InvalidName(rule.name.clone()))?;
        let value = || {
            rule.value
                .as_deref()
                .and_then(|v| HeaderValue::from_str(v).ok())
                .ok_or_else(|| TransformError::InvalidValue(rule.name.clone()))
        };
        match rule.action {
            HeaderAction::Set => {
                out.insert(name, value()?);
            }
            HeaderAction::Append => {
                out.append(name, value()?);
            }
            HeaderAction::Remove => {
                out.remove(name);
            }
        }
    }
    Ok(out)
}

/// Final stage: turns outcomes into client responses.
#[derive(Debug, Clone)]
pub struct ResponsePipeline {
    events: Arc<dyn EventSink>,
}

impl ResponsePipeline {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self { events }
    }

    pub fn shape(&self, outcome: Outcome, request_id: &str) -> Response<Body> {
        match outcome {
            Outcome::NoMatch => error_response(StatusCode::NOT_FOUND, "no route matched", request_id, None),
            Outcome::Rejected(rejected) => error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "route at capacity",
                request_id,
                Some(rejected.retry_after),
            ),
            Outcome::Dispatched { route, result } => match result {
                Ok(response) => self.pass_through(&route, response, request_id),
                Err(err) => self.dispatch_failure(&route, err, request_id),
            },
        }
    }

    fn pass_through(&self, route: &Route, response: Response<Bytes>, request_id: &str) -> Response<Body> {
        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);

        if !route.response_headers.is_empty() {
            match apply_header_rules(&parts.headers, &route.response_headers) {
                Ok(transformed) => parts.headers = transformed,
                Err(e) => self.events.emit(&GatewayEvent::TransformFailed {
                    route_id: route.id.clone(),
                    reason: e.to_string(),
                }),
            }
        }

        if let Ok(value) = HeaderValue::from_str(request_id) {
            parts.headers.insert(X_REQUEST_ID, value);
        }
        Response::from_parts(parts, Body::from(body))
    }

    fn dispatch_failure(&self, route: &Route, err: DispatchError, request_id: &str) -> Response<Body> {
        tracing::warn!(request_id = %request_id, route_id = %route.id, error = %err, "Dispatch failed");
        match err {
            DispatchError::Timeout => {
                error_response(StatusCode::GATEWAY_TIMEOUT, "upstream timed out", request_id, None)
            }
            DispatchError::UpstreamError { .. } => {
                error_response(StatusCode::BAD_GATEWAY, "upstream error", request_id, None)
            }
            DispatchError::ConnectionFailure(_) => {
                error_response(StatusCode::BAD_GATEWAY, "upstream unreachable", request_id, None)
            }
            DispatchError::CircuitOpen(open) => error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "upstream circuit open",
                request_id,
                Some(open.retry_after),
            ),
            DispatchError::NoHealthyEndpoint { .. } => error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "no healthy upstream",
                request_id,
                None,
            ),
        }
    }
}

/// Whole seconds for Retry-After, rounded up, at least one.
fn retry_after_secs(wait: Duration) -> u64 {
    let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
    secs.max(1)
}

/// JSON error response with the request id attached.
pub fn error_response(
    status: StatusCode,
    message: &str,
    request_id: &str,
    retry_after: Option<Duration>,
) -> Response<Body> {
    let body = json!({ "error": message, "request_id": request_id }).to_string();
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(X_REQUEST_ID, value);
    }
    if let Some(wait) = retry_after {
        headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs(wait)));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::config::{GatewayConfig, HealthCheckConfig, RouteConfig, UpstreamConfig};
    use crate::load_balancer::{UpstreamRegistry, UpstreamTarget};
    use crate::observability::BufferedSink;
    use crate::resilience::CircuitOpenError;

    fn route(rules: Vec<HeaderRuleConfig>) -> Arc<Route> {
        let upstreams: HashMap<String, Arc<UpstreamTarget>> =
            UpstreamRegistry::new(Arc::new(BufferedSink::new()))
                .resolve(
                    &[UpstreamConfig::new("svc", vec!["127.0.0.1:3000".into()])],
                    &Default::default(),
                    &HealthCheckConfig::default(),
                )
                .unwrap();
        let mut config = RouteConfig::new("orders", "/orders/*", "svc");
        config.response_headers = rules;
        Arc::new(Route::from_config(&config, &upstreams, &GatewayConfig::default()).unwrap())
    }

    fn rule(action: HeaderAction, name: &str, value: Option<&str>) -> HeaderRuleConfig {
        HeaderRuleConfig {
            action,
            name: name.into(),
            value: value.map(str::to_string),
        }
    }

    fn upstream_ok() -> Response<Bytes> {
        Response::builder()
            .header("server", "backend")
            .header("connection", "close")
            .body(Bytes::from_static(b"payload"))
            .unwrap()
    }

    fn dispatched(route: Arc<Route>, result: Result<Response<Bytes>, DispatchError>) -> Outcome {
        Outcome::Dispatched { route, result }
    }

    #[test]
    fn maps_failures_to_statuses() {
        let pipeline = ResponsePipeline::new(Arc::new(BufferedSink::new()));
        let r = route(vec![]);

        let cases = vec![
            (Outcome::NoMatch, StatusCode::NOT_FOUND),
            (
                Outcome::Rejected(Rejected {
                    route_id: "orders".into(),
                    limit: 2,
                    retry_after: Duration::from_secs(1),
                }),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (dispatched(r.clone(), Err(DispatchError::Timeout)), StatusCode::GATEWAY_TIMEOUT),
            (
                dispatched(
                    r.clone(),
                    Err(DispatchError::UpstreamError {
                        status: StatusCode::INTERNAL_SERVER_ERROR,
                        response: Response::new(Bytes::new()),
                    }),
                ),
                StatusCode::BAD_GATEWAY,
            ),
            (
                dispatched(r.clone(), Err(DispatchError::ConnectionFailure("refused".into()))),
                StatusCode::BAD_GATEWAY,
            ),
            (
                dispatched(
                    r.clone(),
                    Err(DispatchError::NoHealthyEndpoint {
                        upstream: "svc".into(),
                    }),
                ),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (outcome, expected) in cases {
            let response = pipeline.shape(outcome, "req-1");
            assert_eq!(response.status(), expected);
            assert_eq!(response.headers()[X_REQUEST_ID], "req-1");
        }
    }

    #[test]
    fn retry_after_is_rounded_up() {
        let pipeline = ResponsePipeline::new(Arc::new(BufferedSink::new()));
        let response = pipeline.shape(
            dispatched(
                route(vec![]),
                Err(DispatchError::CircuitOpen(CircuitOpenError {
                    upstream: "svc".into(),
                    retry_after: Duration::from_millis(2500),
                })),
            ),
            "req-1",
        );
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "3");

        assert_eq!(retry_after_secs(Duration::ZERO), 1);
        assert_eq!(retry_after_secs(Duration::from_secs(4)), 4);
    }

    #[test]
    fn applies_header_rules_on_success() {
        let pipeline = ResponsePipeline::new(Arc::new(BufferedSink::new()));
        let r = route(vec![
            rule(HeaderAction::Remove, "server", None),
            rule(HeaderAction::Set, "x-gateway", Some("api")),
            rule(HeaderAction::Append, "vary", Some("accept")),
        ]);

        let response = pipeline.shape(dispatched(r, Ok(upstream_ok())), "req-1");
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("server").is_none());
        assert!(response.headers().get("connection").is_none());
        assert_eq!(response.headers()["x-gateway"], "api");
        assert_eq!(response.headers()["vary"], "accept");
    }

    #[test]
    fn malformed_rule_passes_original_through() {
        let sink = Arc::new(BufferedSink::new());
        let pipeline = ResponsePipeline::new(sink.clone());
        let r = route(vec![
            rule(HeaderAction::Remove, "server", None),
            rule(HeaderAction::Set, "x-broken", None),
        ]);

        let response = pipeline.shape(dispatched(r, Ok(upstream_ok())), "req-1");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["server"], "backend");
        assert!(response.headers().get("x-broken").is_none());
        assert_eq!(
            sink.count(|e| matches!(e, GatewayEvent::TransformFailed { .. })),
            1
        );
    }
}
