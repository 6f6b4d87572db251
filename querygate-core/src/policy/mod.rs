//! SQL security validator.
//!
//! [`SqlValidator::validate`] parses a candidate statement and checks it
//! against a [`SecurityPolicy`]. Validation is pure and deterministic: the
//! same SQL and policy always produce the same [`ValidationResult`].
//!
//! Checks run in a fixed order and the first failure wins:
//! 1. parse, single statement only
//! 2. statement kind (SELECT / WITH ... SELECT / set operations, EXPLAIN if allowed)
//! 3. dangerous functions
//! 4. blocked tables
//! 5. blocked and sensitive columns
//! 6. nested query safety
//! 7. WHERE requirement
//! 8. table count limit

mod pattern;
mod scan;

pub use pattern::WildcardPattern;

use serde::{Deserialize, Serialize};
use sqlparser::ast::{SetExpr, Statement};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::Result;
use crate::config::{AppConfig, SecurityPolicy};
use crate::error::{ErrorKind, QueryGateError};
use pattern::normalize_name;
use scan::{StatementFacts, TableRef, Wildcard, function_name, leading_keywords};

/// Functions that are never allowed, regardless of policy.
///
/// Covers backend termination, server file and large-object access, sleeps,
/// cross-database links, session configuration changes, and functions that
/// execute SQL text supplied as a string.
pub const BUILTIN_BLOCKED_FUNCTIONS: &[&str] = &[
    "pg_sleep",
    "pg_sleep_for",
    "pg_sleep_until",
    "pg_terminate_backend",
    "pg_cancel_backend",
    "pg_reload_conf",
    "pg_rotate_logfile",
    "pg_promote",
    "pg_read_file",
    "pg_read_binary_file",
    "pg_write_file",
    "pg_ls_dir",
    "pg_ls_logdir",
    "pg_ls_waldir",
    "pg_ls_tmpdir",
    "pg_ls_archive_statusdir",
    "pg_ls_logicalmapdir",
    "pg_ls_logicalsnapdir",
    "pg_ls_replslotdir",
    "pg_stat_file",
    "pg_execute_sql",
    "lo_import",
    "lo_export",
    "lo_get",
    "lo_put",
    "lo_unlink",
    "lo_from_bytea",
    "lo_open",
    "lo_close",
    "lo_creat",
    "lo_create",
    "lo_truncate",
    "lo_truncate64",
    "lo_lseek",
    "lo_lseek64",
    "lo_tell",
    "lo_tell64",
    "loread",
    "lowrite",
    "dblink",
    "dblink_exec",
    "dblink_connect",
    "dblink_open",
    "copy_from",
    "copy_to",
    "set_config",
    "nextval",
    "setval",
    "pg_notify",
    "pg_advisory_lock",
    "pg_advisory_xact_lock",
    "pg_try_advisory_lock",
    "query_to_xml",
    "query_to_xml_and_xmlschema",
    "cursor_to_xml",
];

/// Schema unqualified table names resolve to when none is configured
const DEFAULT_SEARCH_SCHEMA: &str = "public";

/// Why a statement was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureClass {
    /// The input is not a single parseable statement
    Parse,
    /// The statement parsed but violates the policy
    Policy,
}

/// Outcome of validating one statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Whether the statement may be executed
    pub valid: bool,
    /// Rejection reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Rejection class
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureClass>,
}

impl ValidationResult {
    /// An accepted statement
    pub const fn accepted() -> Self {
        Self {
            valid: true,
            reason: None,
            failure: None,
        }
    }

    /// A statement that could not be parsed
    pub fn parse_error(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
            failure: Some(FailureClass::Parse),
        }
    }

    /// A statement that violates the policy
    pub fn violation(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
            failure: Some(FailureClass::Policy),
        }
    }

    /// Error kind matching the failure class, if rejected.
    pub const fn error_kind(&self) -> Option<ErrorKind> {
        match self.failure {
            Some(FailureClass::Parse) => Some(ErrorKind::SqlParseError),
            Some(FailureClass::Policy) => Some(ErrorKind::SecurityViolation),
            None => None,
        }
    }

    /// Converts a rejection into an error.
    ///
    /// # Errors
    /// Returns `SQL_PARSE_ERROR` or `SECURITY_VIOLATION` when the statement
    /// was rejected.
    pub fn into_result(self) -> Result<()> {
        match (self.error_kind(), self.reason) {
            (Some(kind), Some(reason)) => Err(QueryGateError::new(kind, reason)),
            (Some(kind), None) => Err(QueryGateError::new(kind, "SQL rejected")),
            (None, _) => Ok(()),
        }
    }
}

/// Validates SQL against a policy.
///
/// Convenience wrapper around [`SqlValidator`]; prefer building one validator
/// and reusing it when validating many statements.
pub fn validate(sql: &str, policy: &SecurityPolicy) -> ValidationResult {
    SqlValidator::new(policy).validate(sql)
}

/// Security policy compiled for fast repeated validation.
#[derive(Debug, Clone)]
pub struct SqlValidator {
    blocked_tables: Vec<WildcardPattern>,
    blocked_columns: HashMap<String, HashSet<String>>,
    sensitive_columns: HashSet<String>,
    blocked_functions: HashSet<String>,
    require_where: Vec<WildcardPattern>,
    allow_explain: bool,
    max_join_tables: usize,
    search_path: Vec<String>,
}

impl SqlValidator {
    /// Compiles a policy.
    pub fn new(policy: &SecurityPolicy) -> Self {
        let mut blocked_functions: HashSet<String> = BUILTIN_BLOCKED_FUNCTIONS
            .iter()
            .map(|f| (*f).to_string())
            .collect();
        blocked_functions.extend(policy.blocked_functions.iter().map(|f| function_name(f)));

        Self {
            blocked_tables: policy
                .blocked_tables
                .iter()
                .map(|p| WildcardPattern::new(p))
                .collect(),
            blocked_columns: policy
                .blocked_columns
                .iter()
                .map(|(table, columns)| {
                    (
                        normalize_name(table),
                        columns.iter().map(|c| normalize_name(c)).collect(),
                    )
                })
                .collect(),
            sensitive_columns: policy
                .sensitive_columns
                .iter()
                .map(|c| normalize_name(c))
                .collect(),
            blocked_functions,
            require_where: policy
                .require_where_clause
                .iter()
                .map(|p| WildcardPattern::new(p))
                .collect(),
            allow_explain: policy.allow_explain,
            max_join_tables: policy.max_join_tables,
            search_path: vec![DEFAULT_SEARCH_SCHEMA.to_string()],
        }
    }

    /// Compiles the policy of `config`, resolving unqualified table names
    /// against every configured schema.
    pub fn for_config(config: &AppConfig) -> Self {
        Self::new(&config.security).with_search_path(config.search_schemas())
    }

    /// Schemas an unqualified table name may resolve to. Qualified block
    /// patterns apply to unqualified references through these.
    #[must_use]
    pub fn with_search_path(mut self, schemas: Vec<String>) -> Self {
        let schemas: Vec<String> = schemas
            .iter()
            .map(|schema| normalize_name(schema))
            .filter(|schema| !schema.is_empty())
            .collect();
        if !schemas.is_empty() {
            self.search_path = schemas;
        }
        self
    }

    /// Validates one statement.
    pub fn validate(&self, sql: &str) -> ValidationResult {
        if sql.trim().is_empty() {
            return ValidationResult::parse_error("Empty SQL statement");
        }

        let statements = match Parser::parse_sql(&PostgreSqlDialect {}, sql) {
            Ok(statements) => statements,
            Err(e) => return ValidationResult::parse_error(format!("Failed to parse SQL: {}", e)),
        };

        match statements.as_slice() {
            [] => ValidationResult::parse_error("No SQL statement found"),
            [statement] => self.validate_statement(statement),
            _ => ValidationResult::violation(format!(
                "Multiple statements are not allowed (found {})",
                statements.len()
            )),
        }
    }

    fn validate_statement(&self, statement: &Statement) -> ValidationResult {
        match statement {
            Statement::Query(query) => {
                if !is_select_body(&query.body) {
                    return ValidationResult::violation(format!(
                        "{} statements are not allowed; only SELECT queries are permitted",
                        leading_keywords(&query.body.to_string())
                    ));
                }
            }
            Statement::Explain {
                statement: inner, ..
            } => {
                if !self.allow_explain {
                    return ValidationResult::violation("EXPLAIN statements are not allowed");
                }
                // EXPLAIN ANALYZE runs its statement, so the target must pass on its own
                return self.validate_statement(inner);
            }
            other => {
                return ValidationResult::violation(format!(
                    "{} statements are not allowed; only SELECT queries are permitted",
                    leading_keywords(&other.to_string())
                ));
            }
        }

        let facts = StatementFacts::collect(statement);

        if let Some(reason) = self.check_functions(&facts) {
            return ValidationResult::violation(reason);
        }
        if let Some(reason) = self.check_tables(&facts) {
            return ValidationResult::violation(reason);
        }
        if let Some(reason) = self.check_columns(&facts) {
            return ValidationResult::violation(reason);
        }
        if let Some(reason) = facts.nested_violation.clone() {
            return ValidationResult::violation(reason);
        }
        if let Some(reason) = self.check_where_clause(&facts) {
            return ValidationResult::violation(reason);
        }
        if let Some(reason) = self.check_table_count(&facts) {
            return ValidationResult::violation(reason);
        }

        ValidationResult::accepted()
    }

    fn check_functions(&self, facts: &StatementFacts) -> Option<String> {
        facts
            .functions
            .iter()
            .find(|f| self.blocked_functions.contains(*f) || f.starts_with("dblink"))
            .map(|f| format!("Function '{}' is not allowed", f))
    }

    fn check_tables(&self, facts: &StatementFacts) -> Option<String> {
        // CTE names are checked too: a CTE may shadow a blocked table it reads
        facts.tables.iter().find_map(|table| {
            self.blocked_tables
                .iter()
                .any(|p| p.matches_table(&table.full, &table.bare, &self.search_path))
                .then(|| format!("Access to table '{}' is not allowed", table.full))
        })
    }

    fn denied_columns(&self, table: &TableRef) -> Option<&HashSet<String>> {
        self.blocked_columns
            .get(&table.full)
            .or_else(|| self.blocked_columns.get(&table.bare))
    }

    fn check_columns(&self, facts: &StatementFacts) -> Option<String> {
        for column in &facts.columns {
            if self.sensitive_columns.contains(&column.name) {
                return Some(format!("Access to column '{}' is not allowed", column.name));
            }

            let candidates = match &column.qualifier {
                Some(qualifier) => facts.resolve_qualifier(qualifier),
                None => {
                    // Whole-row reference such as `SELECT u FROM users u`
                    let is_row_reference = facts.aliases.contains_key(&column.name)
                        || facts.tables.iter().any(|t| t.bare == column.name);
                    if is_row_reference
                        && let Some(table) = facts
                            .resolve_qualifier(&column.name)
                            .into_iter()
                            .find(|t| self.denied_columns(t).is_some())
                    {
                        return Some(format!(
                            "Whole-row reference to table '{}' would expose blocked columns",
                            table.full
                        ));
                    }
                    // Unqualified columns may bind to any table in scope
                    facts.tables.clone()
                }
            };

            if let Some(table) = candidates.iter().find(|t| {
                self.denied_columns(t)
                    .is_some_and(|denied| denied.contains(&column.name))
            }) {
                return Some(format!(
                    "Access to column '{}.{}' is not allowed",
                    table.bare, column.name
                ));
            }
        }

        for qualifier in &facts.expression_wildcards {
            if let Some(table) = facts
                .resolve_qualifier(qualifier)
                .into_iter()
                .find(|t| self.denied_columns(t).is_some())
            {
                return Some(format!(
                    "Wildcard '{}.*' over table '{}' would expose blocked columns",
                    qualifier, table.full
                ));
            }
        }

        for select in &facts.selects {
            for wildcard in &select.wildcards {
                let covered = match wildcard {
                    Wildcard::All => select.tables.clone(),
                    Wildcard::Qualified(qualifier) => facts.resolve_qualifier(qualifier),
                };
                if let Some(table) = covered.iter().find(|t| self.denied_columns(t).is_some()) {
                    return Some(format!(
                        "SELECT * over table '{}' would expose blocked columns",
                        table.full
                    ));
                }
            }
        }

        None
    }

    fn check_where_clause(&self, facts: &StatementFacts) -> Option<String> {
        facts
            .selects
            .iter()
            .filter(|select| !select.has_where)
            .flat_map(|select| select.tables.iter())
            .find(|table| {
                !facts.cte_names.contains(&table.full)
                    && self
                        .require_where
                        .iter()
                        .any(|p| p.matches_table(&table.full, &table.bare, &self.search_path))
            })
            .map(|table| format!("Queries on table '{}' must include a WHERE clause", table.full))
    }

    fn check_table_count(&self, facts: &StatementFacts) -> Option<String> {
        let tables: BTreeSet<&str> = facts.distinct_tables();
        (tables.len() > self.max_join_tables).then(|| {
            format!(
                "Query references {} tables; the maximum is {}",
                tables.len(),
                self.max_join_tables
            )
        })
    }
}

fn is_select_body(body: &SetExpr) -> bool {
    match body {
        SetExpr::Select(_) => true,
        SetExpr::Query(query) => is_select_body(&query.body),
        SetExpr::SetOperation { left, right, .. } => is_select_body(left) && is_select_body(right),
        _ => false,
    }
}

fn parse_single(sql: &str) -> Result<Statement> {
    let mut statements = Parser::parse_sql(&PostgreSqlDialect {}, sql).map_err(|e| {
        QueryGateError::new(ErrorKind::SqlParseError, format!("Failed to parse SQL: {}", e))
    })?;
    match statements.len() {
        1 => statements
            .pop()
            .ok_or_else(|| QueryGateError::new(ErrorKind::SqlParseError, "No SQL statement found")),
        0 => Err(QueryGateError::new(
            ErrorKind::SqlParseError,
            "No SQL statement found",
        )),
        n => Err(QueryGateError::new(
            ErrorKind::SecurityViolation,
            format!("Multiple statements are not allowed (found {})", n),
        )),
    }
}

/// Renders SQL in a canonical single-line form.
///
/// # Errors
/// Returns `SQL_PARSE_ERROR` for unparseable input and `SECURITY_VIOLATION`
/// for multi-statement input.
pub fn normalize_sql(sql: &str) -> Result<String> {
    parse_single(sql).map(|statement| statement.to_string())
}

/// Lists the tables a statement reads, lower-cased, sorted and de-duplicated.
/// CTE names are excluded.
///
/// # Errors
/// Same as [`normalize_sql`].
pub fn extract_tables(sql: &str) -> Result<Vec<String>> {
    let statement = parse_single(sql)?;
    let facts = StatementFacts::collect(&statement);
    Ok(facts
        .distinct_tables()
        .into_iter()
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests;
