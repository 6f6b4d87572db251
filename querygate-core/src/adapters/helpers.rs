//! Helper utilities for the PostgreSQL adapter.

use crate::{Result, error::QueryGateError};
use sqlx::{Row, postgres::PgRow};

/// Extension trait for extracting typed values from database rows
/// with consistent error handling.
///
/// # Example
/// ```rust,ignore
/// use querygate_core::adapters::helpers::RowExt;
///
/// let name: String = row.get_field("column_name", Some("public.users"))?;
/// let estimate: Option<i64> = row.get_field("estimated_rows", None)?;
/// ```
pub trait RowExt {
    /// Extracts a typed field from the row.
    ///
    /// # Arguments
    /// * `field_name` - Name of the column to extract
    /// * `table_context` - Optional table name for error messages
    ///
    /// # Errors
    /// Returns a permanent `DATABASE_ERROR` naming the field when it is
    /// missing or has an unexpected type.
    fn get_field<'r, T>(&'r self, field_name: &str, table_context: Option<&str>) -> Result<T>
    where
        T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>;
}

impl RowExt for PgRow {
    fn get_field<'r, T>(&'r self, field_name: &str, table_context: Option<&str>) -> Result<T>
    where
        T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
    {
        self.try_get(field_name)
            .map_err(|e| QueryGateError::parse_field(field_name, table_context, e))
    }
}

/// Converts a planner estimate to a row count; PostgreSQL reports `-1` for
/// tables that were never analyzed.
pub(crate) fn row_estimate(reltuples: Option<i64>) -> Option<u64> {
    reltuples.and_then(|n| u64::try_from(n).ok())
}
