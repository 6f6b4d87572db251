//! Consecutive-failure circuit breaker.
//!
//! State and counters live behind one mutex so concurrent callers never
//! observe a torn state. The lock is never held across an await.

use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls are rejected until the recovery timeout elapses
    Open,
    /// Trial calls are allowed; the next outcome decides
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

/// Circuit breaker guarding one dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    ///
    /// # Arguments
    /// * `name` - Label used in logs
    /// * `failure_threshold` - Consecutive failures that open the circuit (minimum 1)
    /// * `recovery_timeout` - Time an open circuit waits before allowing a trial call
    pub fn new(name: impl Into<String>, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            recovery_timeout,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        // Every update leaves the state consistent, so a poisoned lock is still usable
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Breaker name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Gate checked before every protected call.
    ///
    /// Moves an open circuit to half-open once the recovery timeout has
    /// elapsed since the last failure.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let recovered = inner
                    .last_failure
                    .is_none_or(|at| at.elapsed() >= self.recovery_timeout);
                if recovered {
                    inner.state = CircuitState::HalfOpen;
                    tracing::info!("Circuit '{}' half-open, allowing a trial request", self.name);
                }
                recovered
            }
        }
    }

    /// Records a successful call; closes a half-open circuit.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            tracing::info!("Circuit '{}' closed after successful call", self.name);
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
    }

    /// Records a failed call; opens the circuit at the threshold or when a
    /// trial call fails.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure = Some(Instant::now());

        let should_open = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.consecutive_failures >= self.failure_threshold,
            CircuitState::Open => false,
        };
        if should_open {
            inner.state = CircuitState::Open;
            tracing::warn!(
                "Circuit '{}' opened after {} consecutive failures",
                self.name,
                inner.consecutive_failures
            );
        }
    }

    /// Current state without side effects
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Consecutive failures since the last success
    pub fn failure_count(&self) -> u32 {
        self.lock().consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new("test", 3, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let breaker = breaker();
        assert!(breaker.allow_request());

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow_request());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.failure_count(), 3);
        assert!(!breaker.allow_request());
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let breaker = breaker();
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_then_close_on_success() {
        let breaker = breaker();
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert!(!breaker.allow_request());

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!breaker.allow_request());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.failure_count(), 0);
        assert!(breaker.allow_request());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_then_reopen_on_failure() {
        let breaker = breaker();
        for _ in 0..3 {
            breaker.record_failure();
        }

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(breaker.allow_request());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());

        // The recovery window restarts from the failed trial
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(breaker.allow_request());
    }

    #[tokio::test]
    async fn test_concurrent_failures_open_exactly_once() {
        let breaker = std::sync::Arc::new(CircuitBreaker::new("shared", 10, Duration::from_secs(60)));
        let mut handles = Vec::new();
        for _ in 0..10 {
            let breaker = breaker.clone();
            handles.push(tokio::spawn(async move { breaker.record_failure() }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(breaker.failure_count(), 10);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CircuitState::HalfOpen.to_string(), "HALF_OPEN");
    }
}
