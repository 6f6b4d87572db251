//! Request and response types of the query operation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ErrorDescriptor;

/// One result row keyed by column name, in column order.
pub type Row = Map<String, Value>;

/// What the caller wants back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnMode {
    /// Only the validated SQL, never executed
    Sql,
    /// The executed result
    #[default]
    Result,
}

/// A natural-language question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Caller-supplied id; generated when absent
    #[serde(default)]
    pub request_id: Option<String>,
    /// The question text
    pub question: String,
    /// Target database; optional when exactly one is configured
    #[serde(default)]
    pub database: Option<String>,
    /// What to return
    #[serde(default)]
    pub return_mode: ReturnMode,
}

impl QueryRequest {
    /// Creates a request that executes the generated SQL.
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            request_id: None,
            question: question.into(),
            database: None,
            return_mode: ReturnMode::Result,
        }
    }

    /// Builder method to select the target database.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Builder method to set the return mode.
    #[must_use]
    pub const fn with_return_mode(mut self, mode: ReturnMode) -> Self {
        self.return_mode = mode;
        self
    }

    /// Builder method to set the request id.
    #[must_use]
    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

/// Rows returned by an executed statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names in select-list order
    pub columns: Vec<String>,
    /// Returned rows, at most the configured row cap
    pub rows: Vec<Row>,
    /// Number of rows returned
    pub row_count: usize,
    /// Number of rows the statement produced
    pub total_row_count: u64,
    /// Whether rows were dropped by the row cap
    pub truncated: bool,
    /// Statement execution time
    pub execution_time_ms: u64,
}

/// Timing and diagnostic information attached to every response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMetadata {
    /// Generation attempts used, including rejected ones
    pub generation_attempts: u32,
    /// Tokens reported by the generator across all attempts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
    /// Statement execution time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    /// Wall-clock time of the whole request
    pub total_time_ms: u64,
    /// Non-fatal notes, e.g. a low-confidence warning
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Outcome of one query request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    /// Whether the request succeeded
    pub success: bool,
    /// Id threaded through every log line of the request
    pub request_id: String,
    /// The validated SQL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    /// Executed result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<QueryResult>,
    /// Result confidence (0-100) when a result validator scored it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u8>,
    /// Failure descriptor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDescriptor>,
    /// Timing and diagnostics
    pub metadata: ResponseMetadata,
}
