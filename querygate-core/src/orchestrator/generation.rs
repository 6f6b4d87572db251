//! Generate / validate loop.
//!
//! Each round asks the generator for SQL, then validates it. A rejection is
//! fed back as corrective context for the next round. The number of rounds
//! is bounded by the generation budget; an open circuit ends the loop
//! without consuming a round.

use tokio::time::Instant;

use super::{QueryOrchestrator, RequestState};
use crate::Result;
use crate::adapters::GeneratedSql;
use crate::error::{ErrorKind, QueryGateError};
use crate::policy::FailureClass;
use crate::resilience::{CircuitBreaker, RetryError, rate_limiter};

impl QueryOrchestrator {
    pub(super) async fn generate_validated_sql(
        &self,
        question: &str,
        schema_context: &str,
        state: &mut RequestState,
        deadline: Instant,
    ) -> Result<String> {
        let mut last_sql: Option<String> = None;
        let mut last_error: Option<String> = None;
        let mut reasons: Vec<String> = Vec::new();
        let mut only_parse_failures = true;

        while state.generation_attempts < self.max_generation_attempts {
            if !self.resilience.llm_breaker.allow_request() {
                return Err(llm_unavailable(&self.resilience.llm_breaker));
            }
            state.generation_attempts = state.generation_attempts.saturating_add(1);

            let generated = self
                .call_generator(
                    question,
                    schema_context,
                    last_sql.as_deref(),
                    last_error.as_deref(),
                    deadline,
                )
                .await?;
            state.add_tokens(generated.tokens_used);
            tracing::debug!(
                "Generated SQL (attempt {}): {}",
                state.generation_attempts,
                generated.sql
            );

            let verdict = self.validator.validate(&generated.sql);
            if verdict.valid {
                return Ok(generated.sql);
            }

            let reason = verdict
                .reason
                .clone()
                .unwrap_or_else(|| "SQL rejected".to_string());
            tracing::warn!(
                "Generated SQL rejected (attempt {}/{}): {}",
                state.generation_attempts,
                self.max_generation_attempts,
                reason
            );
            self.metrics
                .record_sql_rejected(verdict.error_kind().unwrap_or(ErrorKind::SecurityViolation));
            if verdict.failure != Some(FailureClass::Parse) {
                only_parse_failures = false;
            }
            reasons.push(reason.clone());
            last_sql = Some(generated.sql);
            last_error = Some(reason);
        }

        let kind = if only_parse_failures && !reasons.is_empty() {
            ErrorKind::SqlParseError
        } else {
            ErrorKind::SecurityViolation
        };
        let last = reasons.last().cloned().unwrap_or_default();
        Err(QueryGateError::new(
            kind,
            format!(
                "No acceptable SQL after {} attempts: {}",
                state.generation_attempts, last
            ),
        )
        .with_detail("attempts", state.generation_attempts)
        .with_detail("reasons", reasons))
    }

    /// One generation round: rate limited, guarded by the LLM breaker and
    /// retried for transient failures.
    async fn call_generator(
        &self,
        question: &str,
        schema_context: &str,
        prior_attempt: Option<&str>,
        error_feedback: Option<&str>,
        deadline: Instant,
    ) -> Result<GeneratedSql> {
        let _permit = self
            .resilience
            .rate_limiter
            .acquire(rate_limiter::LLM)
            .await?;

        let breaker = &self.resilience.llm_breaker;
        let generator = &self.generator;
        let metrics = &self.metrics;

        let outcome = self
            .resilience
            .llm_retry
            .run("sql generation", Some(deadline), |_| async move {
                if !breaker.allow_request() {
                    return Err(llm_unavailable(breaker));
                }
                let started = Instant::now();
                match generator
                    .generate(question, schema_context, prior_attempt, error_feedback)
                    .await
                {
                    Ok(generated) => {
                        breaker.record_success();
                        metrics.record_llm_call(true, started.elapsed(), generated.tokens_used);
                        Ok(generated)
                    }
                    Err(e) => {
                        metrics.record_llm_call(false, started.elapsed(), None);
                        if matches!(e.kind(), ErrorKind::LlmError | ErrorKind::LlmTimeout) {
                            breaker.record_failure();
                        }
                        Err(e)
                    }
                }
            })
            .await;

        outcome.map_err(|e| match e {
            RetryError::Aborted(err) => err,
            RetryError::Exhausted { attempts, last } => QueryGateError::new(
                last.kind(),
                format!("SQL generation failed after {} attempts: {}", attempts, last.message()),
            )
            .permanent()
            .with_detail("attempts", attempts),
            RetryError::DeadlineExceeded { attempts, .. } => QueryGateError::new(
                ErrorKind::LlmTimeout,
                "Request deadline reached while retrying SQL generation",
            )
            .permanent()
            .with_detail("attempts", attempts),
        })
    }
}

fn llm_unavailable(breaker: &CircuitBreaker) -> QueryGateError {
    QueryGateError::new(
        ErrorKind::LlmUnavailable,
        "SQL generation is temporarily unavailable",
    )
    .with_detail("circuit_state", breaker.state().to_string())
    .with_detail("failure_count", breaker.failure_count())
}
