//! Resilience kit: circuit breakers, rate limiting and bounded retry.
//!
//! All instances are built once by [`Resilience::from_config`] and shared by
//! reference with the orchestrator, so every request sees the same breaker
//! state and the same concurrency limits.

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use rate_limiter::{MultiRateLimiter, RateLimitPermit, RateLimiter};
pub use retry::{RetryError, RetryPolicy};

use std::time::Duration;

use crate::config::ResilienceConfig;
use crate::error::ErrorKind;

/// The shared resilience components of one process.
#[derive(Debug)]
pub struct Resilience {
    /// Guards the SQL generator
    pub llm_breaker: CircuitBreaker,
    /// Guards statement execution
    pub db_breaker: CircuitBreaker,
    /// Gates for the `llm` and `database` resource classes
    pub rate_limiter: MultiRateLimiter,
    /// Retries transient generator failures
    pub llm_retry: RetryPolicy,
    /// Retries transient database failures
    pub db_retry: RetryPolicy,
}

impl Resilience {
    /// Builds every component from validated settings.
    ///
    /// # Errors
    /// Returns a configuration error if the settings are invalid.
    pub fn from_config(config: &ResilienceConfig) -> crate::Result<Self> {
        config.validate()?;

        let llm_retry = RetryPolicy::new(
            config.max_attempts(),
            config.retry_delay(),
            config.backoff_factor,
            Duration::from_millis(config.llm_max_delay_ms),
        )
        .with_retriable_kinds([ErrorKind::LlmError, ErrorKind::LlmTimeout]);
        llm_retry.validate()?;

        let db_retry = RetryPolicy::new(
            config.max_attempts(),
            config.retry_delay(),
            config.backoff_factor,
            Duration::from_millis(config.db_max_delay_ms),
        )
        .with_retriable_kinds([ErrorKind::DatabaseError]);
        db_retry.validate()?;

        let rate_limiter = MultiRateLimiter::new()
            .with_class(
                rate_limiter::LLM,
                config.llm_max_concurrent,
                config.rate_limit_wait(),
            )
            .with_class(
                rate_limiter::DATABASE,
                config.db_max_concurrent,
                config.rate_limit_wait(),
            );

        tracing::debug!(
            "Resilience configured: {} attempts, breaker threshold {}, llm/db concurrency {}/{}",
            config.max_attempts(),
            config.circuit_breaker_threshold,
            config.llm_max_concurrent,
            config.db_max_concurrent
        );

        Ok(Self {
            llm_breaker: CircuitBreaker::new(
                "llm",
                config.circuit_breaker_threshold,
                config.circuit_breaker_timeout(),
            ),
            db_breaker: CircuitBreaker::new(
                "database",
                config.circuit_breaker_threshold,
                config.circuit_breaker_timeout(),
            ),
            rate_limiter,
            llm_retry,
            db_retry,
        })
    }
}
