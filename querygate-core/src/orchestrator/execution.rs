//! Statement execution under the database rate limit, breaker and retry.

use tokio::time::Instant;

use super::{QueryOrchestrator, RequestState, elapsed_ms};
use crate::Result;
use crate::error::{ErrorKind, QueryGateError};
use crate::query::QueryResult;
use crate::resilience::{RetryError, rate_limiter};

impl QueryOrchestrator {
    pub(super) async fn execute_sql(
        &self,
        database: &str,
        sql: &str,
        state: &mut RequestState,
        deadline: Instant,
    ) -> Result<QueryResult> {
        let _permit = self
            .resilience
            .rate_limiter
            .acquire(rate_limiter::DATABASE)
            .await?;

        // Never let a single statement outlive the request
        let timeout = self
            .statement_timeout
            .min(deadline.saturating_duration_since(Instant::now()));
        let max_rows = self.max_rows;
        let breaker = &self.resilience.db_breaker;
        let executor = &self.executor;
        let metrics = &self.metrics;
        let started = Instant::now();

        let outcome = self
            .resilience
            .db_retry
            .run("sql execution", Some(deadline), |_| async move {
                if !breaker.allow_request() {
                    return Err(QueryGateError::database("Database is temporarily unavailable")
                        .permanent()
                        .with_detail("circuit_state", breaker.state().to_string())
                        .with_detail("failure_count", breaker.failure_count()));
                }
                let attempt_started = Instant::now();
                match executor.execute(database, sql, timeout, max_rows).await {
                    Ok(output) => {
                        breaker.record_success();
                        metrics.record_db_query(true, attempt_started.elapsed());
                        Ok(output)
                    }
                    Err(e) => {
                        metrics.record_db_query(false, attempt_started.elapsed());
                        // Statement errors say nothing about database health
                        if e.is_transient() || e.kind() == ErrorKind::ExecutionTimeout {
                            breaker.record_failure();
                        }
                        Err(e)
                    }
                }
            })
            .await;

        state.execution_time_ms = Some(elapsed_ms(started));

        let output = outcome.map_err(|e| match e {
            RetryError::Aborted(err) => err,
            RetryError::Exhausted { attempts, last } => QueryGateError::new(
                ErrorKind::DatabaseError,
                format!("Query execution failed after {} attempts: {}", attempts, last.message()),
            )
            .permanent()
            .with_detail("attempts", attempts),
            RetryError::DeadlineExceeded { attempts, .. } => QueryGateError::new(
                ErrorKind::ExecutionTimeout,
                "Request deadline reached while retrying execution",
            )
            .permanent()
            .with_detail("attempts", attempts),
        })?;

        let row_count = output.rows.len();
        let total_row_count = output.total_row_count.max(row_count as u64);
        tracing::info!(
            "Execution returned {} rows ({} total) in {}ms",
            row_count,
            total_row_count,
            state.execution_time_ms.unwrap_or(0)
        );

        Ok(QueryResult {
            columns: output.columns,
            rows: output.rows,
            row_count,
            total_row_count,
            truncated: total_row_count > row_count as u64,
            execution_time_ms: state.execution_time_ms.unwrap_or(0),
        })
    }
}
