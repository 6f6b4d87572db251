//! Collaborator traits consumed by the schema cache and the orchestrator.
//!
//! The gateway never talks to a language model or a database driver
//! directly. Everything outside the trust boundary is reached through one
//! of these traits:
//! - [`SqlGenerator`]: turns a question plus schema context into SQL
//! - [`SqlExecutor`]: runs validated SQL in a read-only session
//! - [`ResultValidator`]: scores how well a result answers the question
//! - [`SchemaIntrospector`]: enumerates metadata for the schema cache
//!
//! All traits are object-safe and used through `Arc<dyn ...>`.

use async_trait::async_trait;
use std::time::Duration;

use crate::Result;
use crate::models::{ColumnInfo, EnumTypeInfo, ForeignKeyInfo, IndexInfo, TableInfo, ViewInfo};
use crate::query::Row;

#[cfg(feature = "postgresql")]
pub mod helpers;
#[cfg(feature = "postgresql")]
pub mod postgres;

/// SQL produced by one generator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedSql {
    /// Candidate statement, not yet validated
    pub sql: String,
    /// Tokens consumed, when the generator reports them
    pub tokens_used: Option<u32>,
}

impl GeneratedSql {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            tokens_used: None,
        }
    }

    #[must_use]
    pub const fn with_tokens(mut self, tokens: u32) -> Self {
        self.tokens_used = Some(tokens);
        self
    }
}

/// Rows returned by one execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOutput {
    /// Column names in result order
    pub columns: Vec<String>,
    /// At most `max_rows` rows
    pub rows: Vec<Row>,
    /// Rows the statement would return without the fetch cap
    pub total_row_count: u64,
}

/// Plausibility score for an executed result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultAssessment {
    /// 0 to 100
    pub confidence: u8,
    pub explanation: Option<String>,
}

/// Natural-language to SQL generator.
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    /// Generates a candidate statement.
    ///
    /// # Arguments
    /// * `question` - The caller's question
    /// * `schema_context` - Bounded schema summary from the cache
    /// * `prior_attempt` - SQL from the previous rejected attempt, if any
    /// * `error_feedback` - Why the previous attempt was rejected
    ///
    /// # Errors
    /// Transient failures use `LLM_ERROR` / `LLM_TIMEOUT`; anything marked
    /// permanent is not retried.
    async fn generate(
        &self,
        question: &str,
        schema_context: &str,
        prior_attempt: Option<&str>,
        error_feedback: Option<&str>,
    ) -> Result<GeneratedSql>;
}

/// Executes validated SQL.
///
/// # Security
/// Implementations must run every statement in a read-only transaction with
/// the given statement timeout and a restricted session. The orchestrator
/// relies on this and does not set up sessions itself.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Runs `sql` against `database`, returning at most `max_rows` rows.
    ///
    /// # Errors
    /// Transient failures are `DATABASE_ERROR` errors left transient;
    /// statement timeouts are `EXECUTION_TIMEOUT`.
    async fn execute(
        &self,
        database: &str,
        sql: &str,
        timeout: Duration,
        max_rows: usize,
    ) -> Result<ExecutionOutput>;
}

/// Scores whether a result plausibly answers the question.
#[async_trait]
pub trait ResultValidator: Send + Sync {
    async fn validate(
        &self,
        question: &str,
        sql: &str,
        sample_rows: &[Row],
        row_count: u64,
    ) -> Result<ResultAssessment>;
}

/// Metadata source for the schema cache.
///
/// Tables are listed first; per-table details are then fetched one call at
/// a time so a failure can be attributed to the table that caused it.
#[async_trait]
pub trait SchemaIntrospector: Send + Sync {
    /// Base tables with name, schema, comment and row estimate filled in.
    async fn list_tables(&self, database: &str) -> Result<Vec<TableInfo>>;

    /// Columns of `table`; ordering is fixed up by the cache.
    async fn columns(&self, database: &str, table: &TableInfo) -> Result<Vec<ColumnInfo>>;

    /// Primary key column names in key order.
    async fn primary_key(&self, database: &str, table: &TableInfo) -> Result<Vec<String>>;

    async fn foreign_keys(&self, database: &str, table: &TableInfo) -> Result<Vec<ForeignKeyInfo>>;

    async fn indexes(&self, database: &str, table: &TableInfo) -> Result<Vec<IndexInfo>>;

    async fn views(&self, database: &str) -> Result<Vec<ViewInfo>>;

    async fn enum_types(&self, database: &str) -> Result<Vec<EnumTypeInfo>>;
}
