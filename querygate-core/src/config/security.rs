//! Security policy applied to every generated statement.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::QueryGateError;

/// Rules the SQL validator enforces.
///
/// Table and column names are compared case-insensitively. Table patterns
/// support `*` and `?` wildcards; a pattern containing a `.` is matched
/// against the schema-qualified name, otherwise against the bare table name.
///
/// # Example
/// ```rust
/// use querygate_core::config::SecurityPolicy;
///
/// let policy = SecurityPolicy::default()
///     .with_blocked_tables(vec!["audit_*".to_string()])
///     .with_require_where_clause(vec!["orders".to_string()]);
///
/// assert!(policy.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityPolicy {
    /// Wildcard patterns of tables that may never be referenced
    pub blocked_tables: Vec<String>,
    /// Columns that may never be referenced, keyed by table name
    pub blocked_columns: BTreeMap<String, Vec<String>>,
    /// Column names rejected wherever they appear unqualified
    pub sensitive_columns: Vec<String>,
    /// Function names rejected in addition to the built-in denylist
    pub blocked_functions: Vec<String>,
    /// Whether `EXPLAIN` of an otherwise valid query is accepted
    pub allow_explain: bool,
    /// Tables that may only be read with a `WHERE` clause
    pub require_where_clause: Vec<String>,
    /// Maximum number of distinct tables in one statement
    pub max_join_tables: usize,
    /// Statement timeout applied by the executor
    pub statement_timeout_secs: u64,
    /// Maximum rows returned to the caller
    pub max_rows: usize,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            blocked_tables: Vec::new(),
            blocked_columns: BTreeMap::new(),
            sensitive_columns: Vec::new(),
            blocked_functions: Vec::new(),
            allow_explain: false,
            require_where_clause: Vec::new(),
            max_join_tables: 5,
            statement_timeout_secs: 30,
            max_rows: 1000,
        }
    }
}

impl SecurityPolicy {
    /// Statement timeout as a duration
    pub const fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_secs)
    }

    /// Builder method to set blocked table patterns.
    #[must_use]
    pub fn with_blocked_tables(mut self, patterns: Vec<String>) -> Self {
        self.blocked_tables = patterns;
        self
    }

    /// Builder method to block columns of one table.
    #[must_use]
    pub fn with_blocked_columns(mut self, table: impl Into<String>, columns: Vec<String>) -> Self {
        self.blocked_columns.insert(table.into(), columns);
        self
    }

    /// Builder method to set globally sensitive column names.
    #[must_use]
    pub fn with_sensitive_columns(mut self, columns: Vec<String>) -> Self {
        self.sensitive_columns = columns;
        self
    }

    /// Builder method to add blocked functions.
    #[must_use]
    pub fn with_blocked_functions(mut self, functions: Vec<String>) -> Self {
        self.blocked_functions = functions;
        self
    }

    /// Builder method to allow or deny EXPLAIN.
    #[must_use]
    pub const fn with_allow_explain(mut self, allow: bool) -> Self {
        self.allow_explain = allow;
        self
    }

    /// Builder method to set tables that require a WHERE clause.
    #[must_use]
    pub fn with_require_where_clause(mut self, tables: Vec<String>) -> Self {
        self.require_where_clause = tables;
        self
    }

    /// Builder method to set the join limit.
    #[must_use]
    pub const fn with_max_join_tables(mut self, max: usize) -> Self {
        self.max_join_tables = max;
        self
    }

    /// Builder method to set the row cap.
    #[must_use]
    pub const fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Validates the policy.
    ///
    /// # Errors
    /// Returns a configuration error for empty patterns or zero limits.
    pub fn validate(&self) -> crate::Result<()> {
        if self.blocked_tables.iter().any(|p| p.trim().is_empty()) {
            return Err(QueryGateError::configuration(
                "security.blocked_tables contains an empty pattern",
            ));
        }

        if self.max_join_tables == 0 {
            return Err(QueryGateError::configuration(
                "security.max_join_tables must be greater than 0",
            ));
        }

        if self.statement_timeout_secs == 0 {
            return Err(QueryGateError::configuration(
                "security.statement_timeout_secs must be greater than 0",
            ));
        }

        if self.max_rows == 0 {
            return Err(QueryGateError::configuration(
                "security.max_rows must be greater than 0",
            ));
        }

        Ok(())
    }
}
