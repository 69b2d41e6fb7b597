//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether a route's requests may be retried at all
//! - Hold the per-route attempt limit and backoff curve
//! - Enforce a shared retry budget (retries per time window)
//!
//! # Design Decisions
//! - Routes are retryable when marked idempotent; unmarked routes retry only
//!   idempotent methods (GET, HEAD, PUT, DELETE, OPTIONS, TRACE)
//! - Which failures are retryable is decided by the dispatch error itself
//! - The budget caps retries at a ratio of requests so a failing upstream
//!   does not multiply its own load

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::http::Method;

use crate::config::RetryConfig;
use crate::resilience::backoff::Backoff;

/// Retry settings compiled into a route.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Backoff,
    /// Explicit idempotency of the route; `None` defers to the method.
    pub idempotent: Option<bool>,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig, idempotent: Option<bool>) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff: Backoff::from_config(config),
            idempotent,
        }
    }

    /// Never retry.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            backoff: Backoff {
                base: Duration::ZERO,
                max: Duration::ZERO,
                jitter_ratio: 0.0,
            },
            idempotent: Some(false),
        }
    }

    /// Whether a request with `method` on this route may be sent twice.
    pub fn permits(&self, method: &Method) -> bool {
        self.max_retries > 0 && self.idempotent.unwrap_or_else(|| method.is_idempotent())
    }
}

/// Shared cap on retries as a fraction of recent requests.
#[derive(Debug)]
pub struct RetryBudget {
    ratio: f64,
    min_retries: u64,
    window: Duration,
    requests: AtomicU64,
    retries: AtomicU64,
    window_start: AtomicU64,
    epoch: Instant,
}

impl RetryBudget {
    pub fn new(ratio: f64, min_retries: u64, window: Duration) -> Self {
        Self {
            ratio: ratio.max(0.0),
            min_retries,
            window,
            requests: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            window_start: AtomicU64::new(0),
            epoch: Instant::now(),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.budget_ratio,
            config.budget_min_retries,
            Duration::from_secs(config.budget_window_secs.max(1)),
        )
    }

    /// Count one original (non-retry) request.
    pub fn record_request(&self) {
        self.roll_window();
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Take one retry out of the budget. Returns false when exhausted.
    pub fn try_withdraw(&self) -> bool {
        self.roll_window();
        let allowed = self
            .min_retries
            .max((self.requests.load(Ordering::Relaxed) as f64 * self.ratio) as u64);
        let mut current = self.retries.load(Ordering::Relaxed);
        loop {
            if current >= allowed {
                return false;
            }
            match self.retries.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn roll_window(&self) {
        let now = self.epoch.elapsed().as_secs();
        let start = self.window_start.load(Ordering::Relaxed);
        if now.saturating_sub(start) >= self.window.as_secs()
            && self
                .window_start
                .compare_exchange(start, now, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            self.requests.store(0, Ordering::Relaxed);
            self.retries.store(0, Ordering::Relaxed);
        }
    }
}
