//! Bounded retry with exponential backoff.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, warn};

use crate::error::{ErrorKind, QueryGateError};

/// Why a retried operation gave up.
#[derive(Debug, Error)]
pub enum RetryError {
    /// Every attempt failed with a retriable error
    #[error("Retries exhausted after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: QueryGateError,
    },
    /// A non-retriable error stopped the loop
    #[error(transparent)]
    Aborted(QueryGateError),
    /// The next backoff would overrun the caller's deadline
    #[error("Deadline reached after {attempts} attempts")]
    DeadlineExceeded {
        attempts: u32,
        last: Option<QueryGateError>,
    },
}

impl RetryError {
    /// Attempts made before giving up; `None` for an aborted loop.
    pub const fn attempts(&self) -> Option<u32> {
        match self {
            Self::Exhausted { attempts, .. } | Self::DeadlineExceeded { attempts, .. } => {
                Some(*attempts)
            }
            Self::Aborted(_) => None,
        }
    }

    /// The underlying error of the final attempt.
    pub fn into_last_error(self) -> Option<QueryGateError> {
        match self {
            Self::Exhausted { last, .. } | Self::Aborted(last) => Some(last),
            Self::DeadlineExceeded { last, .. } => last,
        }
    }
}

/// Retry settings for one kind of protected call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    backoff_factor: f64,
    max_delay: Duration,
    retriable_kinds: HashSet<ErrorKind>,
}

impl RetryPolicy {
    /// Creates a policy that retries nothing until kinds are added with
    /// [`Self::with_retriable_kinds`].
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        backoff_factor: f64,
        max_delay: Duration,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay,
            backoff_factor,
            max_delay,
            retriable_kinds: HashSet::new(),
        }
    }

    /// Sets the error kinds that consume a retry.
    #[must_use]
    pub fn with_retriable_kinds(mut self, kinds: impl IntoIterator<Item = ErrorKind>) -> Self {
        self.retriable_kinds = kinds.into_iter().collect();
        self
    }

    /// Total attempts including the first
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Validates the settings.
    ///
    /// # Errors
    /// Returns a configuration error for zero attempts, a backoff factor
    /// below 1.0, or a max delay smaller than the initial delay.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_attempts == 0 {
            return Err(QueryGateError::configuration(
                "Retry policy needs at least one attempt",
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(QueryGateError::configuration(
                "Retry backoff factor must be at least 1.0",
            ));
        }
        if self.max_delay < self.initial_delay {
            return Err(QueryGateError::configuration(
                "Retry max delay must not be smaller than the initial delay",
            ));
        }
        Ok(())
    }

    /// Delay before retry number `retry` (0-based):
    /// `min(initial_delay * backoff_factor^retry, max_delay)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let nanos = self.initial_delay.as_nanos() as f64 * self.backoff_factor.powi(exponent);
        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(nanos.max(0.0) as u64)
    }

    /// Whether `error` should consume a retry.
    pub fn is_retriable(&self, error: &QueryGateError) -> bool {
        error.is_transient() && self.retriable_kinds.contains(&error.kind())
    }

    /// Runs `operation` until it succeeds, fails with a non-retriable error,
    /// runs out of attempts, or the next backoff would pass `deadline`.
    ///
    /// The closure receives the 1-based attempt number.
    ///
    /// # Errors
    /// See [`RetryError`].
    pub async fn run<T, F, Fut>(
        &self,
        operation_name: &str,
        deadline: Option<Instant>,
        mut operation: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = crate::Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            attempt = attempt.saturating_add(1);
            let err = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !self.is_retriable(&err) {
                return Err(RetryError::Aborted(err));
            }

            if attempt >= max_attempts {
                error!(
                    "Failed to execute '{}' after {} attempts: {}",
                    operation_name, attempt, err
                );
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = self.delay_for(attempt.saturating_sub(1));
            if deadline.is_some_and(|d| d.saturating_duration_since(Instant::now()) <= delay) {
                warn!(
                    "Operation '{}' stopped after {} attempts, deadline reached: {}",
                    operation_name, attempt, err
                );
                return Err(RetryError::DeadlineExceeded {
                    attempts: attempt,
                    last: Some(err),
                });
            }

            warn!(
                "Operation '{}' failed. Retrying in {:?} (Attempt {}/{}): {}",
                operation_name, delay, attempt, max_attempts, err
            );
            tokio::time::sleep(delay).await;
        }
    }
}
