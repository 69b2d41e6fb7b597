//! Per-request dispatch bookkeeping.

use std::time::Duration;

use tokio::time::Instant;

/// State of one request as it moves through dispatch.
#[derive(Debug, Clone)]
pub struct InFlightRequest {
    /// Request id, propagated upstream as `x-request-id`.
    pub correlation_id: String,
    pub route_id: String,
    pub started_at: Instant,
    /// Retries performed so far (attempts minus one).
    pub retries: u32,
    /// No attempt starts or continues past this instant.
    pub deadline: Instant,
}

impl InFlightRequest {
    pub fn new(correlation_id: impl Into<String>, route_id: impl Into<String>, budget: Duration) -> Self {
        let started_at = Instant::now();
        Self {
            correlation_id: correlation_id.into(),
            route_id: route_id.into(),
            started_at,
            retries: 0,
            deadline: started_at + budget,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}
