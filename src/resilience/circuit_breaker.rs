//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: upstream assumed down, requests fail fast
//! - Half-Open: exactly one trial request probes for recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: open_duration elapsed, first caller takes the trial
//! Half-Open → Closed: trial succeeds
//! Half-Open → Open: trial fails (open timer restarts)
//! ```
//!
//! # Design Decisions
//! - Per-upstream circuit breaker (not global)
//! - Lock-free: state, counter and open timestamp are atomics
//! - Fail fast in Open state (no network call is attempted)
//! - A permit dropped without an outcome counts as a failure, so a cancelled
//!   request is accounted like a timed-out one

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;

use crate::config::CircuitBreakerConfig;
use crate::observability::{EventSink, GatewayEvent};

/// Circuit state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(val: u8) -> Self {
        match val {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        })
    }
}

/// Returned instead of a permit while the circuit refuses calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("circuit for upstream `{upstream}` is open")]
pub struct CircuitOpenError {
    pub upstream: String,
    /// Time until a trial request will be let through.
    pub retry_after: Duration,
}

/// Point-in-time view for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
}

/// Closed / Open / Half-Open state machine for one upstream.
#[derive(Debug)]
pub struct CircuitBreaker {
    upstream: String,
    failure_threshold: u32,
    open_duration: Duration,
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    /// Nanoseconds since `epoch` at which the circuit last opened.
    opened_at: AtomicU64,
    epoch: Instant,
    events: Arc<dyn EventSink>,
}

impl CircuitBreaker {
    pub fn new(
        upstream: impl Into<String>,
        config: &CircuitBreakerConfig,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            upstream: upstream.into(),
            failure_threshold: config.failure_threshold.max(1),
            open_duration: config.open_duration(),
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: AtomicU32::new(0),
            opened_at: AtomicU64::new(0),
            epoch: Instant::now(),
            events,
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        CircuitSnapshot {
            state: self.state(),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
        }
    }

    /// Ask for permission to call the upstream.
    pub fn try_acquire(self: &Arc<Self>) -> Result<CallPermit, CircuitOpenError> {
        loop {
            match self.state() {
                CircuitState::Closed => return Ok(CallPermit::new(self.clone(), false)),
                // The single trial is already in flight.
                CircuitState::HalfOpen => return Err(self.open_error(Duration::ZERO)),
                CircuitState::Open => {
                    let elapsed = self.since_opened();
                    if elapsed < self.open_duration {
                        return Err(self.open_error(self.open_duration - elapsed));
                    }
                    if self.swap_state(CircuitState::Open, CircuitState::HalfOpen) {
                        return Ok(CallPermit::new(self.clone(), true));
                    }
                }
            }
        }
    }

    fn open_error(&self, retry_after: Duration) -> CircuitOpenError {
        CircuitOpenError {
            upstream: self.upstream.clone(),
            retry_after,
        }
    }

    fn now_nanos(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    fn since_opened(&self) -> Duration {
        let opened = self.opened_at.load(Ordering::Acquire);
        Duration::from_nanos(self.now_nanos().saturating_sub(opened))
    }

    fn stamp_open(&self) {
        self.opened_at.store(self.now_nanos(), Ordering::Release);
    }

    fn swap_state(&self, from: CircuitState, to: CircuitState) -> bool {
        let swapped = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if swapped {
            if to == CircuitState::Closed {
                self.consecutive_failures.store(0, Ordering::Relaxed);
            }
            self.events.emit(&GatewayEvent::CircuitTransition {
                upstream: self.upstream.clone(),
                from,
                to,
            });
        }
        swapped
    }

    fn on_success(&self, trial: bool) {
        if trial {
            self.swap_state(CircuitState::HalfOpen, CircuitState::Closed);
        } else if self.state() == CircuitState::Closed {
            self.consecutive_failures.store(0, Ordering::Relaxed);
        }
    }

    fn on_failure(&self, trial: bool) {
        if trial {
            self.stamp_open();
            self.swap_state(CircuitState::HalfOpen, CircuitState::Open);
            return;
        }
        if self.state() != CircuitState::Closed {
            return;
        }
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= self.failure_threshold {
            self.stamp_open();
            self.swap_state(CircuitState::Closed, CircuitState::Open);
        }
    }

    /// Give an unused trial back; the next caller may take it immediately.
    fn return_trial(&self) {
        self.swap_state(CircuitState::HalfOpen, CircuitState::Open);
    }
}

/// Permission for one upstream call. Settle it with [`CallPermit::success`]
/// or [`CallPermit::failure`]; dropping it unsettled records a failure.
#[derive(Debug)]
#[must_use = "an unsettled permit counts as a failure"]
pub struct CallPermit {
    breaker: Arc<CircuitBreaker>,
    trial: bool,
    settled: bool,
}

impl CallPermit {
    fn new(breaker: Arc<CircuitBreaker>, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    /// Whether this is the Half-Open probe.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }

    /// No call was made (e.g. no endpoint available); record nothing.
    pub fn release(mut self) {
        self.settled = true;
        if self.trial {
            self.breaker.return_trial();
        }
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.settled {
            tracing::debug!(upstream = %self.breaker.upstream, trial = self.trial, "Call abandoned, counting as failure");
            self.breaker.on_failure(self.trial);
        }
    }
}
