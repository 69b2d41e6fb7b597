//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use api_gateway::config::{GatewayConfig, RouteConfig, UpstreamConfig};
use api_gateway::dispatch::{SendError, UpstreamClient};
use api_gateway::lifecycle::Shutdown;
use api_gateway::HttpServer;
use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{Request, Response, StatusCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};

/// Read until the end of the request head; the mocks ignore bodies.
async fn read_head(socket: &mut TcpStream) -> String {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Path of the request line, e.g. "/health".
fn request_path(head: &str) -> String {
    head.split_whitespace().nth(1).unwrap_or("/").to_string()
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "200 OK",
        404 => "404 Not Found",
        429 => "429 Too Many Requests",
        500 => "500 Internal Server Error",
        502 => "502 Bad Gateway",
        503 => "503 Service Unavailable",
        _ => "200 OK",
    }
}

/// Start a simple mock backend that returns a fixed response.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    start_programmable_backend(move |_path| async move { (200, response.to_string()) }).await
}

/// Start a programmable mock backend. `f` receives the request path.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let head = read_head(&mut socket).await;
                        let (status, body) = f(request_path(&head)).await;
                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text(status),
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Gateway config with one upstream and one catch-all route.
pub fn single_route_config(addresses: Vec<String>) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.upstreams = vec![UpstreamConfig::new("svc", addresses)];
    config.routes = vec![RouteConfig::new("all", "*", "svc")];
    config.health_check.enabled = false;
    config
}

/// A server running on an ephemeral port.
pub struct RunningServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub config_updates: mpsc::UnboundedSender<GatewayConfig>,
}

impl RunningServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start `server` and wait until it accepts connections.
pub async fn spawn_server(server: HttpServer) -> RunningServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let (config_updates, updates_rx) = mpsc::unbounded_channel();
    let server_shutdown = shutdown.subscribe();

    tokio::spawn(async move {
        let _ = server.run(listener, updates_rx, server_shutdown).await;
    });

    for _ in 0..100 {
        if TcpStream::connect(addr).await.is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    RunningServer {
        addr,
        shutdown,
        config_updates,
    }
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// What a [`FakeUpstream`] does with one call.
#[derive(Debug, Clone)]
pub enum Behavior {
    Respond(u16, &'static str),
    ConnectError,
    /// Never answers; the dispatcher's timeout must fire.
    Hang,
}

/// In-process `UpstreamClient` replaying scripted behaviors.
///
/// Once the script runs out every call gets `fallback`. When gated, calls
/// wait for a permit from [`FakeUpstream::release`] before answering.
#[derive(Debug)]
pub struct FakeUpstream {
    script: Mutex<VecDeque<Behavior>>,
    fallback: Mutex<Behavior>,
    calls: AtomicUsize,
    gate: Option<Semaphore>,
}

impl FakeUpstream {
    pub fn new(fallback: Behavior) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            calls: AtomicUsize::new(0),
            gate: None,
        })
    }

    pub fn scripted(script: Vec<Behavior>, fallback: Behavior) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback: Mutex::new(fallback),
            calls: AtomicUsize::new(0),
            gate: None,
        })
    }

    pub fn gated(fallback: Behavior) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            calls: AtomicUsize::new(0),
            gate: Some(Semaphore::new(0)),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Queue `behavior` for the next call.
    pub fn push(&self, behavior: Behavior) {
        self.script.lock().unwrap().push_back(behavior);
    }

    pub fn set_fallback(&self, behavior: Behavior) {
        *self.fallback.lock().unwrap() = behavior;
    }

    /// Let `n` gated calls proceed.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }
}

#[async_trait]
impl UpstreamClient for FakeUpstream {
    async fn send(
        &self,
        request: Request<Bytes>,
        timeout: Duration,
    ) -> Result<Response<Bytes>, SendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().unwrap().clone());

        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }

        match behavior {
            Behavior::Respond(status, body) => Ok(Response::builder()
                .status(StatusCode::from_u16(status).unwrap())
                .header("x-upstream-path", request.uri().path())
                .body(Bytes::from_static(body.as_bytes()))
                .unwrap()),
            Behavior::ConnectError => Err(SendError::Connect("connection refused".into())),
            Behavior::Hang => {
                tokio::time::sleep(timeout + Duration::from_secs(60)).await;
                Err(SendError::Timeout)
            }
        }
    }
}
