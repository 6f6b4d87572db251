//! Bounded-concurrency gates per resource class.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{ErrorKind, QueryGateError};

/// Resource class for SQL generator calls
pub const LLM: &str = "llm";
/// Resource class for statement execution
pub const DATABASE: &str = "database";

/// A held permit; the slot is released when this guard is dropped.
///
/// Dropping covers every exit path of the protected call, including errors
/// and cancellation of the surrounding future.
#[derive(Debug)]
pub struct RateLimitPermit {
    _permit: OwnedSemaphorePermit,
}

/// Concurrency gate for one resource class.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    name: String,
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    max_wait: Duration,
}

impl RateLimiter {
    /// Creates a gate allowing `max_concurrent` holders (minimum 1) and
    /// waiting at most `max_wait` for a slot.
    pub fn new(name: impl Into<String>, max_concurrent: usize, max_wait: Duration) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            name: name.into(),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            max_wait,
        }
    }

    /// Waits up to the configured limit for a slot.
    ///
    /// # Errors
    /// Returns `RATE_LIMIT_EXCEEDED` when no slot frees up in time.
    pub async fn acquire(&self) -> crate::Result<RateLimitPermit> {
        match tokio::time::timeout(self.max_wait, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(RateLimitPermit { _permit: permit }),
            Ok(Err(closed)) => Err(QueryGateError::internal(
                format!("Rate limiter '{}' is closed", self.name),
                closed,
            )),
            Err(_) => {
                tracing::warn!(
                    "Rate limit for '{}' exceeded after waiting {:?}",
                    self.name,
                    self.max_wait
                );
                Err(QueryGateError::new(
                    ErrorKind::RateLimitExceeded,
                    format!("Too many concurrent '{}' requests, try again later", self.name),
                )
                .with_detail("resource", self.name.clone())
                .with_detail("max_concurrent", self.max_concurrent))
            }
        }
    }

    /// Slots currently free
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots currently held
    pub fn active_count(&self) -> usize {
        self.max_concurrent.saturating_sub(self.available_permits())
    }

    /// Configured concurrency
    pub const fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}

/// Registry of gates keyed by resource class.
#[derive(Debug, Clone, Default)]
pub struct MultiRateLimiter {
    limiters: HashMap<String, RateLimiter>,
}

impl MultiRateLimiter {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a gate for `class`, replacing any existing one.
    #[must_use]
    pub fn with_class(mut self, class: &str, max_concurrent: usize, max_wait: Duration) -> Self {
        self.limiters.insert(
            class.to_string(),
            RateLimiter::new(class, max_concurrent, max_wait),
        );
        self
    }

    /// Gate for `class`, if registered
    pub fn limiter(&self, class: &str) -> Option<&RateLimiter> {
        self.limiters.get(class)
    }

    /// Acquires a permit for `class`.
    ///
    /// # Errors
    /// Returns `RATE_LIMIT_EXCEEDED` on timeout, or an internal error for an
    /// unregistered class.
    pub async fn acquire(&self, class: &str) -> crate::Result<RateLimitPermit> {
        match self.limiters.get(class) {
            Some(limiter) => limiter.acquire().await,
            None => Err(QueryGateError::new(
                ErrorKind::InternalError,
                format!("No rate limiter registered for '{}'", class),
            )),
        }
    }

    /// Free slots for `class`; `None` when the class is unregistered.
    pub fn available_permits(&self, class: &str) -> Option<usize> {
        self.limiters.get(class).map(RateLimiter::available_permits)
    }
}
