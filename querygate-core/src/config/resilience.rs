//! Retry, circuit breaker and rate limiting settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::QueryGateError;

/// Resilience settings shared by the LLM and database paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Retries after the first attempt; also bounds SQL regeneration
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds
    pub retry_delay_ms: u64,
    /// Multiplier applied to the delay after every retry
    pub backoff_factor: f64,
    /// Delay cap for generator retries in milliseconds
    pub llm_max_delay_ms: u64,
    /// Delay cap for executor retries in milliseconds
    pub db_max_delay_ms: u64,
    /// Consecutive failures that open a circuit
    pub circuit_breaker_threshold: u32,
    /// Seconds an open circuit waits before a trial request
    pub circuit_breaker_timeout_secs: u64,
    /// Concurrent generator calls
    pub llm_max_concurrent: usize,
    /// Concurrent statement executions
    pub db_max_concurrent: usize,
    /// Maximum wait for a rate-limit permit in milliseconds
    pub rate_limit_wait_ms: u64,
    /// Overall deadline for one request in seconds
    pub request_timeout_secs: u64,
}

/// Upper bound for `request_timeout_secs` (one day)
pub const MAX_REQUEST_TIMEOUT_SECS: u64 = 86_400;

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1000,
            backoff_factor: 2.0,
            llm_max_delay_ms: 60_000,
            db_max_delay_ms: 30_000,
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout_secs: 60,
            llm_max_concurrent: 10,
            db_max_concurrent: 20,
            rate_limit_wait_ms: 5000,
            request_timeout_secs: 120,
        }
    }
}

impl ResilienceConfig {
    /// Initial retry delay
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Recovery timeout of an open circuit
    pub const fn circuit_breaker_timeout(&self) -> Duration {
        Duration::from_secs(self.circuit_breaker_timeout_secs)
    }

    /// Maximum wait for a rate-limit permit
    pub const fn rate_limit_wait(&self) -> Duration {
        Duration::from_millis(self.rate_limit_wait_ms)
    }

    /// Overall request deadline
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Total attempts including the first one.
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Validates the settings.
    ///
    /// # Errors
    /// Returns a configuration error for zero limits or an invalid backoff.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(QueryGateError::configuration(
                "resilience.backoff_factor must be at least 1.0",
            ));
        }

        if self.llm_max_delay_ms < self.retry_delay_ms || self.db_max_delay_ms < self.retry_delay_ms
        {
            return Err(QueryGateError::configuration(
                "resilience max delays must not be smaller than retry_delay_ms",
            ));
        }

        if self.circuit_breaker_threshold == 0 {
            return Err(QueryGateError::configuration(
                "resilience.circuit_breaker_threshold must be greater than 0",
            ));
        }

        if self.llm_max_concurrent == 0 || self.db_max_concurrent == 0 {
            return Err(QueryGateError::configuration(
                "resilience concurrency limits must be greater than 0",
            ));
        }

        if self.request_timeout_secs == 0 || self.request_timeout_secs > MAX_REQUEST_TIMEOUT_SECS {
            return Err(QueryGateError::configuration(format!(
                "resilience.request_timeout_secs must be between 1 and {}",
                MAX_REQUEST_TIMEOUT_SECS
            )));
        }

        Ok(())
    }
}
