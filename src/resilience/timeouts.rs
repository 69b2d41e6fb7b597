//! Timeout enforcement.
//!
//! # Responsibilities
//! - Derive each attempt's timeout from the route timeout and the request deadline
//! - Wrap upstream calls so a hung client still yields a timeout
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors (504, not 502)

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// The attempt timeout: the route timeout, shortened to what is left before
/// the deadline. `None` once the deadline has passed.
pub fn attempt_timeout(route_timeout: Duration, deadline: Instant) -> Option<Duration> {
    let remaining = deadline.checked_duration_since(Instant::now())?;
    if remaining.is_zero() {
        return None;
    }
    Some(route_timeout.min(remaining))
}

/// Run `fut`, giving up after `limit`.
pub async fn within<F: Future>(limit: Duration, fut: F) -> Option<F::Output> {
    tokio::time::timeout(limit, fut).await.ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_timeout_is_bounded_by_deadline() {
        let deadline = Instant::now() + Duration::from_millis(200);
        let timeout = attempt_timeout(Duration::from_secs(5), deadline).unwrap();
        assert!(timeout <= Duration::from_millis(200));

        let timeout = attempt_timeout(Duration::from_millis(50), deadline).unwrap();
        assert_eq!(timeout, Duration::from_millis(50));
    }

    #[test]
    fn expired_deadline_yields_none() {
        let deadline = Instant::now() - Duration::from_millis(1);
        assert!(attempt_timeout(Duration::from_secs(1), deadline).is_none());
    }

    #[tokio::test]
    async fn within_reports_timeout() {
        let slow = tokio::time::sleep(Duration::from_millis(200));
        assert!(within(Duration::from_millis(10), slow).await.is_none());
        assert_eq!(within(Duration::from_millis(50), async { 7 }).await, Some(7));
    }
}
