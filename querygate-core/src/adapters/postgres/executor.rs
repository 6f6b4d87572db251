//! Read-only statement execution.
//!
//! Every statement runs in its own transaction that is marked read-only,
//! given a `SET LOCAL statement_timeout`, and always rolled back. Rows come
//! back as JSON objects via `row_to_json`, capped at `max_rows`.

use super::PostgresAdapter;
use crate::Result;
use crate::adapters::helpers::RowExt;
use crate::adapters::{ExecutionOutput, SqlExecutor};
use crate::error::{ErrorKind, QueryGateError};
use crate::query::Row;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgRow;
use std::time::Duration;

/// SQLSTATE raised when `statement_timeout` cancels a statement
const QUERY_CANCELED: &str = "57014";

/// Column name PostgreSQL uses for EXPLAIN output
const EXPLAIN_COLUMN: &str = "QUERY PLAN";

#[async_trait]
impl SqlExecutor for PostgresAdapter {
    async fn execute(
        &self,
        database: &str,
        sql: &str,
        timeout: Duration,
        max_rows: usize,
    ) -> Result<ExecutionOutput> {
        let pool = self.pool(database)?;
        let statement = strip_trailing_semicolons(sql);

        let mut tx = pool
            .begin()
            .await
            .map_err(|e| classify_error(e, database))?;

        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| classify_error(e, database))?;

        let timeout_ms = timeout.as_millis().max(1);
        sqlx::query(&format!("SET LOCAL statement_timeout = {}", timeout_ms))
            .execute(&mut *tx)
            .await
            .map_err(|e| classify_error(e, database))?;

        let output = if is_explain(statement) {
            let rows = sqlx::query(statement)
                .persistent(false)
                .fetch_all(&mut *tx)
                .await
                .map_err(|e| classify_error(e, database))?;
            explain_output(&rows, max_rows)?
        } else {
            let rows = sqlx::query(&wrap_statement(statement, max_rows))
                .persistent(false)
                .fetch_all(&mut *tx)
                .await
                .map_err(|e| classify_error(e, database))?;
            json_output(&rows)?
        };

        if let Err(e) = tx.rollback().await {
            tracing::debug!("Rollback of read-only transaction failed: {}", e);
        }

        tracing::debug!(
            "Statement on '{}' returned {} of {} rows",
            database,
            output.rows.len(),
            output.total_row_count
        );
        Ok(output)
    }
}

/// Wraps a SELECT so each row arrives as one JSON object together with the
/// uncapped row count.
///
/// The statement sits on its own lines so a trailing `--` comment cannot
/// swallow the closing parenthesis or the LIMIT.
pub(crate) fn wrap_statement(sql: &str, max_rows: usize) -> String {
    format!(
        "SELECT row_to_json(q.*) AS row_data, count(*) OVER () AS total_count \
         FROM (\n{}\n) AS q LIMIT {}",
        sql, max_rows
    )
}

pub(crate) fn strip_trailing_semicolons(sql: &str) -> &str {
    sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}

pub(crate) fn is_explain(sql: &str) -> bool {
    sql.split_whitespace()
        .next()
        .is_some_and(|word| word.eq_ignore_ascii_case("explain"))
}

fn json_output(rows: &[PgRow]) -> Result<ExecutionOutput> {
    let mut output = ExecutionOutput::default();

    for row in rows {
        let total: i64 = row.get_field("total_count", None)?;
        output.total_row_count = u64::try_from(total).unwrap_or(0);

        match row.get_field::<Value>("row_data", None)? {
            Value::Object(map) => {
                if output.columns.is_empty() {
                    output.columns = map.keys().cloned().collect();
                }
                output.rows.push(map);
            }
            other => {
                return Err(QueryGateError::database(format!(
                    "Unexpected row shape from database: {}",
                    json_type_name(&other)
                ))
                .permanent());
            }
        }
    }

    Ok(output)
}

fn explain_output(rows: &[PgRow], max_rows: usize) -> Result<ExecutionOutput> {
    let mut plan = Vec::with_capacity(rows.len().min(max_rows));
    for row in rows.iter().take(max_rows) {
        let line = match row.get_field::<String>(EXPLAIN_COLUMN, None) {
            Ok(text) => Value::String(text),
            Err(_) => row.get_field::<Value>(EXPLAIN_COLUMN, None)?,
        };
        let mut map = Row::new();
        map.insert(EXPLAIN_COLUMN.to_string(), line);
        plan.push(map);
    }

    Ok(ExecutionOutput {
        columns: vec![EXPLAIN_COLUMN.to_string()],
        total_row_count: rows.len() as u64,
        rows: plan,
    })
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Whether a SQLSTATE denotes a condition worth retrying: connection
/// exceptions (08), transaction rollbacks such as serialization failures
/// (40), insufficient resources (53) and operator intervention other than
/// query cancellation (57P).
pub(crate) fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08") || code.starts_with("40") || code.starts_with("53") || code.starts_with("57P")
}

/// Maps a driver error onto the gateway taxonomy.
///
/// Messages never include the connection URL.
pub(crate) fn classify_error(error: sqlx::Error, database: &str) -> QueryGateError {
    match &error {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            let message = db_err.message().to_string();

            if code == QUERY_CANCELED {
                return QueryGateError::new(
                    ErrorKind::ExecutionTimeout,
                    format!("Statement on '{}' exceeded its timeout", database),
                )
                .with_source(error);
            }

            let classified = QueryGateError::database(format!("Query failed: {}", message))
                .with_detail("sqlstate", code.clone());
            if is_transient_sqlstate(&code) {
                classified.with_source(error)
            } else {
                classified.permanent().with_source(error)
            }
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Protocol(_) => {
            QueryGateError::database(format!("Connection to '{}' failed", database))
                .with_source(error)
        }
        sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => QueryGateError::database(format!(
            "Connection pool for '{}' is unavailable",
            database
        ))
        .permanent()
        .with_source(error),
        _ => QueryGateError::database(format!("Query on '{}' failed", database))
            .permanent()
            .with_source(error),
    }
}
