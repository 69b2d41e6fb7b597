//! Request dispatch with timeout, retry and circuit breaking.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ConnectInfo;
use axum::http::{HeaderValue, Request, Response, Uri};
use tokio::time::Instant;

use crate::dispatch::client::{SendError, UpstreamClient};
use crate::dispatch::error::DispatchError;
use crate::dispatch::in_flight::InFlightRequest;
use crate::http::headers::{add_forwarded, strip_hop_by_hop};
use crate::http::request::X_REQUEST_ID;
use crate::load_balancer::Endpoint;
use crate::observability::{EventSink, GatewayEvent};
use crate::resilience::timeouts::{attempt_timeout, within};
use crate::resilience::RetryBudget;
use crate::routing::Route;

/// Sends admitted requests to their route's upstream.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    client: Arc<dyn UpstreamClient>,
    budget: Arc<RetryBudget>,
    events: Arc<dyn EventSink>,
}

impl Dispatcher {
    pub fn new(
        client: Arc<dyn UpstreamClient>,
        budget: Arc<RetryBudget>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            client,
            budget,
            events,
        }
    }

    /// Send `request` to `route`'s upstream, retrying where allowed.
    ///
    /// Every attempt goes through the upstream's circuit breaker. A 5xx answer
    /// is a failure and comes back as [`DispatchError::UpstreamError`] once
    /// retries are exhausted.
    pub async fn dispatch(
        &self,
        route: &Route,
        flight: &mut InFlightRequest,
        request: Request<Bytes>,
    ) -> Result<Response<Bytes>, DispatchError> {
        self.budget.record_request();
        let retry_allowed = route.retry.permits(request.method());

        loop {
            let err = match self.attempt(route, flight, &request).await {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            if !retry_allowed
                || !err.is_retryable()
                || flight.retries >= route.retry.max_retries
                || route.upstream.breaker().is_open()
            {
                return Err(err);
            }

            let delay = route.retry.backoff.delay(flight.retries + 1);
            if Instant::now() + delay >= flight.deadline {
                tracing::debug!(request_id = %flight.correlation_id, "Deadline too close to retry");
                return Err(err);
            }
            if !self.budget.try_withdraw() {
                tracing::warn!(request_id = %flight.correlation_id, route_id = %route.id, "Retry budget exhausted");
                return Err(err);
            }

            flight.retries += 1;
            self.events.emit(&GatewayEvent::RetryScheduled {
                request_id: flight.correlation_id.clone(),
                route_id: route.id.clone(),
                attempt: flight.retries,
                delay,
                reason: err.reason(),
            });
            tokio::time::sleep(delay).await;
        }
    }

    /// One pass through breaker, balancer and client.
    async fn attempt(
        &self,
        route: &Route,
        flight: &InFlightRequest,
        request: &Request<Bytes>,
    ) -> Result<Response<Bytes>, DispatchError> {
        let upstream = &route.upstream;
        let permit = upstream.breaker().try_acquire()?;

        let Some(endpoint) = upstream.select() else {
            permit.release();
            return Err(DispatchError::NoHealthyEndpoint {
                upstream: upstream.name().to_string(),
            });
        };

        let Some(timeout) = attempt_timeout(route.timeout, flight.deadline) else {
            permit.release();
            return Err(DispatchError::Timeout);
        };

        let outbound = match outbound_request(request, &endpoint, &flight.correlation_id) {
            Ok(outbound) => outbound,
            Err(reason) => {
                permit.release();
                return Err(DispatchError::ConnectionFailure(reason));
            }
        };

        tracing::debug!(
            request_id = %flight.correlation_id,
            upstream = %upstream.name(),
            endpoint = %endpoint.address,
            timeout = ?timeout,
            trial = permit.is_trial(),
            "Forwarding request"
        );

        // The client enforces the timeout too; this covers clients that do not.
        let outcome = within(timeout, self.client.send(outbound, timeout))
            .await
            .unwrap_or(Err(SendError::Timeout));

        match outcome {
            Ok(response) if response.status().is_server_error() => {
                permit.failure();
                upstream.report(&endpoint, false);
                Err(DispatchError::UpstreamError {
                    status: response.status(),
                    response,
                })
            }
            Ok(response) => {
                permit.success();
                upstream.report(&endpoint, true);
                Ok(response)
            }
            Err(e) => {
                permit.failure();
                upstream.report(&endpoint, false);
                tracing::warn!(
                    request_id = %flight.correlation_id,
                    endpoint = %endpoint.address,
                    error = %e,
                    "Upstream attempt failed"
                );
                Err(match e {
                    SendError::Timeout => DispatchError::Timeout,
                    SendError::Connect(reason) | SendError::Protocol(reason) => {
                        DispatchError::ConnectionFailure(reason)
                    }
                })
            }
        }
    }
}

/// Copy of `request` addressed to `endpoint`.
fn outbound_request(
    request: &Request<Bytes>,
    endpoint: &Endpoint,
    request_id: &str,
) -> Result<Request<Bytes>, String> {
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let uri = Uri::builder()
        .scheme("http")
        .authority(endpoint.address.as_str())
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| e.to_string())?;

    let mut headers = request.headers().clone();
    strip_hop_by_hop(&mut headers);
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    add_forwarded(&mut headers, client);
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(X_REQUEST_ID, value);
    }

    let mut outbound = Request::builder()
        .method(request.method().clone())
        .uri(uri)
        .body(request.body().clone())
        .map_err(|e| e.to_string())?;
    *outbound.headers_mut() = headers;
    Ok(outbound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::http::{Method, StatusCode};

    use crate::config::{
        CircuitBreakerConfig, GatewayConfig, HealthCheckConfig, RetryConfig, RouteConfig,
        UpstreamConfig,
    };
    use crate::load_balancer::UpstreamRegistry;
    use crate::observability::BufferedSink;
    use crate::resilience::CircuitState;

    /// Replays canned outcomes, then answers 200.
    #[derive(Debug, Default)]
    struct Scripted {
        outcomes: Mutex<VecDeque<Result<StatusCode, SendError>>>,
        calls: AtomicUsize,
        seen: Mutex<Vec<Request<Bytes>>>,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<StatusCode, SendError>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl UpstreamClient for Scripted {
        async fn send(
            &self,
            request: Request<Bytes>,
            _timeout: Duration,
        ) -> Result<Response<Bytes>, SendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request);
            let next = self.outcomes.lock().unwrap().pop_front();
            let status = next.unwrap_or(Ok(StatusCode::OK))?;
            Ok(Response::builder()
                .status(status)
                .body(Bytes::from_static(b"body"))
                .unwrap())
        }
    }

    fn route(sink: Arc<BufferedSink>, max_retries: u32, failure_threshold: u32) -> Route {
        let mut upstream = UpstreamConfig::new("svc", vec!["127.0.0.1:3000".into()]);
        upstream.circuit_breaker = Some(CircuitBreakerConfig {
            failure_threshold,
            open_duration_ms: 60_000,
        });
        let upstreams: HashMap<_, _> = UpstreamRegistry::new(sink)
            .resolve(&[upstream], &Default::default(), &HealthCheckConfig::default())
            .unwrap();

        let mut config = RouteConfig::new("orders", "/orders/*", "svc");
        config.retry = Some(RetryConfig {
            max_retries,
            base_delay_ms: 1,
            max_delay_ms: 2,
            ..Default::default()
        });
        Route::from_config(&config, &upstreams, &GatewayConfig::default()).unwrap()
    }

    fn dispatcher(client: Arc<Scripted>, sink: Arc<BufferedSink>) -> Dispatcher {
        Dispatcher::new(
            client,
            Arc::new(RetryBudget::new(1.0, 100, Duration::from_secs(60))),
            sink,
        )
    }

    fn get(path: &str) -> Request<Bytes> {
        Request::builder().uri(path).body(Bytes::new()).unwrap()
    }

    fn flight() -> InFlightRequest {
        InFlightRequest::new("req-1", "orders", Duration::from_secs(5))
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let sink = Arc::new(BufferedSink::new());
        let client = Scripted::new(vec![Ok(StatusCode::SERVICE_UNAVAILABLE)]);
        let dispatcher = dispatcher(client.clone(), sink.clone());
        let route = route(sink.clone(), 2, 10);

        let mut flight = flight();
        let response = dispatcher
            .dispatch(&route, &mut flight, get("/orders/1?x=1"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(flight.retries, 1);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            sink.count(|e| matches!(e, GatewayEvent::RetryScheduled { .. })),
            1
        );

        let seen = client.seen.lock().unwrap();
        assert_eq!(seen[0].uri().to_string(), "http://127.0.0.1:3000/orders/1?x=1");
        assert_eq!(seen[0].headers()[X_REQUEST_ID], "req-1");
    }

    #[tokio::test]
    async fn non_idempotent_requests_are_not_retried() {
        let sink = Arc::new(BufferedSink::new());
        let client = Scripted::new(vec![Err(SendError::Timeout)]);
        let dispatcher = dispatcher(client.clone(), sink.clone());
        let route = route(sink, 3, 10);

        let post = Request::builder()
            .method(Method::POST)
            .uri("/orders")
            .body(Bytes::from_static(b"{}"))
            .unwrap();
        let err = dispatcher
            .dispatch(&route, &mut flight(), post)
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::Timeout));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn client_errors_pass_through_without_retry() {
        let sink = Arc::new(BufferedSink::new());
        let client = Scripted::new(vec![Ok(StatusCode::NOT_FOUND)]);
        let dispatcher = dispatcher(client.clone(), sink.clone());
        let route = route(sink, 3, 1);

        let response = dispatcher
            .dispatch(&route, &mut flight(), get("/orders/9"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(route.upstream.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn open_circuit_fails_fast_without_calling_upstream() {
        let sink = Arc::new(BufferedSink::new());
        let client = Scripted::new(vec![Err(SendError::Connect("refused".into())); 3]);
        let dispatcher = dispatcher(client.clone(), sink.clone());
        let route = route(sink, 0, 3);

        for _ in 0..3 {
            let err = dispatcher
                .dispatch(&route, &mut flight(), get("/orders"))
                .await
                .unwrap_err();
            assert!(matches!(err, DispatchError::ConnectionFailure(_)));
        }
        assert_eq!(route.upstream.breaker().state(), CircuitState::Open);

        let started = std::time::Instant::now();
        let err = dispatcher
            .dispatch(&route, &mut flight(), get("/orders"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::CircuitOpen(_)));
        assert!(started.elapsed() < Duration::from_millis(50));
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_stop_once_the_circuit_opens() {
        let sink = Arc::new(BufferedSink::new());
        let client = Scripted::new(vec![Ok(StatusCode::BAD_GATEWAY); 5]);
        let dispatcher = dispatcher(client.clone(), sink.clone());
        let route = route(sink, 5, 2);

        let err = dispatcher
            .dispatch(&route, &mut flight(), get("/orders"))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UpstreamError { status, .. } if status == StatusCode::BAD_GATEWAY));
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn outbound_strips_hop_by_hop_headers() {
        let endpoint = Endpoint::new("10.0.0.5:8080").unwrap();
        let request = Request::builder()
            .uri("/a/b")
            .header("connection", "keep-alive")
            .header("x-custom", "1")
            .body(Bytes::new())
            .unwrap();

        let outbound = outbound_request(&request, &endpoint, "abc").unwrap();
        assert_eq!(outbound.uri().to_string(), "http://10.0.0.5:8080/a/b");
        assert!(outbound.headers().get("connection").is_none());
        assert_eq!(outbound.headers()["x-custom"], "1");
        assert_eq!(outbound.headers()[X_REQUEST_ID], "abc");
    }
}
