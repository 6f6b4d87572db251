//! Schema snapshot data structures.
//!
//! A [`DatabaseSchema`] is built once per load and never mutated; the schema
//! cache shares it behind an `Arc` and replaces it wholesale on refresh.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time description of one database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSchema {
    /// Logical database name from configuration
    pub name: String,
    /// Tables ordered by schema and name
    pub tables: Vec<TableInfo>,
    /// Views ordered by schema and name
    pub views: Vec<ViewInfo>,
    /// User-defined enum types
    pub enum_types: Vec<EnumTypeInfo>,
    /// When this snapshot was assembled
    pub cached_at: DateTime<Utc>,
    /// Non-fatal problems encountered while loading
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl DatabaseSchema {
    /// Creates a snapshot stamped with the current time.
    pub fn new(name: impl Into<String>, tables: Vec<TableInfo>) -> Self {
        Self {
            name: name.into(),
            tables,
            views: Vec::new(),
            enum_types: Vec::new(),
            cached_at: Utc::now(),
            warnings: Vec::new(),
        }
    }

    /// Finds a table by bare or schema-qualified name, case-insensitively.
    pub fn table(&self, name: &str) -> Option<&TableInfo> {
        let wanted = name.to_lowercase();
        self.tables.iter().find(|t| {
            t.name.to_lowercase() == wanted || t.qualified_name().to_lowercase() == wanted
        })
    }

    /// Total number of columns across all tables
    pub fn column_count(&self) -> usize {
        self.tables.iter().map(|t| t.columns.len()).sum()
    }
}

/// Table metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    /// Schema (namespace) the table lives in
    pub schema: String,
    /// Table name
    pub name: String,
    /// Columns in ordinal order
    pub columns: Vec<ColumnInfo>,
    /// Primary key column names in key order
    #[serde(default)]
    pub primary_key: Vec<String>,
    /// Outgoing foreign keys
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyInfo>,
    /// Indexes on the table
    #[serde(default)]
    pub indexes: Vec<IndexInfo>,
    /// Table comment
    pub comment: Option<String>,
    /// Planner row estimate
    pub row_count_estimate: Option<u64>,
}

impl TableInfo {
    /// Creates a table with no columns or keys.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            indexes: Vec::new(),
            comment: None,
            row_count_estimate: None,
        }
    }

    /// `schema.name`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Finds a column by name, case-insensitively.
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name
    pub name: String,
    /// Database type name as reported by the catalog
    pub data_type: String,
    /// Whether NULL is allowed
    pub is_nullable: bool,
    /// Default expression
    pub default_value: Option<String>,
    /// Whether the column is part of the primary key
    pub is_primary_key: bool,
    /// Column comment
    pub comment: Option<String>,
    /// 1-based position in the table
    pub ordinal_position: u32,
}

impl ColumnInfo {
    /// Creates a nullable, non-key column.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, ordinal_position: u32) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_nullable: true,
            default_value: None,
            is_primary_key: false,
            comment: None,
            ordinal_position,
        }
    }
}

/// Foreign key relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyInfo {
    /// Constraint name
    pub name: Option<String>,
    /// Referencing columns
    pub columns: Vec<String>,
    /// Referenced schema
    pub referenced_schema: String,
    /// Referenced table
    pub referenced_table: String,
    /// Referenced columns, positionally matching `columns`
    pub referenced_columns: Vec<String>,
}

/// Index metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    /// Index name
    pub name: String,
    /// Indexed columns in key order
    pub columns: Vec<String>,
    /// Whether the index enforces uniqueness
    pub is_unique: bool,
    /// Whether the index backs the primary key
    pub is_primary: bool,
    /// Access method (btree, hash, gin, ...)
    pub index_type: Option<String>,
}

/// View metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewInfo {
    /// Schema the view lives in
    pub schema: String,
    /// View name
    pub name: String,
    /// Columns in ordinal order
    pub columns: Vec<ColumnInfo>,
    /// View comment
    pub comment: Option<String>,
}

/// User-defined enum type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumTypeInfo {
    /// Schema the type lives in
    pub schema: String,
    /// Type name
    pub name: String,
    /// Labels in sort order
    pub values: Vec<String>,
}
