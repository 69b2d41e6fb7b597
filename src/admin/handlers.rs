use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::admission::AdmissionStats;
use crate::http::server::AppState;
use crate::load_balancer::UpstreamSnapshot;

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub status: String,
    pub uptime_secs: u64,
    pub table_version: u64,
    pub routes: usize,
    pub upstreams: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RouteStatus {
    pub id: String,
    pub path: String,
    pub upstream: String,
    pub timeout_ms: u64,
    pub max_in_flight: Option<usize>,
    pub max_retries: u32,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let table = state.gateway.routes().lookup();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "operational".to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        table_version: table.version(),
        routes: table.len(),
        upstreams: state.gateway.registry().all().len(),
    })
}

/// Active routes in declaration order.
pub async fn get_routes(State(state): State<AppState>) -> Json<Vec<RouteStatus>> {
    let table = state.gateway.routes().lookup();
    Json(
        table
            .routes()
            .iter()
            .map(|route| RouteStatus {
                id: route.id.clone(),
                path: route.pattern.to_string(),
                upstream: route.upstream.name().to_string(),
                timeout_ms: u64::try_from(route.timeout.as_millis()).unwrap_or(u64::MAX),
                max_in_flight: route.max_in_flight,
                max_retries: route.retry.max_retries,
            })
            .collect(),
    )
}

pub async fn get_upstreams(State(state): State<AppState>) -> Json<Vec<UpstreamSnapshot>> {
    Json(
        state
            .gateway
            .registry()
            .all()
            .iter()
            .map(|upstream| upstream.snapshot())
            .collect(),
    )
}

pub async fn get_admission(State(state): State<AppState>) -> Json<Vec<AdmissionStats>> {
    Json(state.gateway.admission().all_stats())
}
