//! PostgreSQL catalog queries backing the schema cache.
//!
//! Only the schemas listed in the database's configuration are visited, and
//! only tables the connected role can SELECT from are listed.

use super::PostgresAdapter;
use crate::Result;
use crate::adapters::SchemaIntrospector;
use crate::adapters::helpers::{RowExt, row_estimate};
use crate::error::QueryGateError;
use crate::models::{ColumnInfo, EnumTypeInfo, ForeignKeyInfo, IndexInfo, TableInfo, ViewInfo};
use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::BTreeMap;

const TABLES_QUERY: &str = r#"
    SELECT
        t.table_schema::text AS table_schema,
        t.table_name::text AS table_name,
        obj_description(c.oid, 'pg_class') AS table_comment,
        c.reltuples::bigint AS estimated_rows
    FROM information_schema.tables t
    LEFT JOIN pg_namespace n ON n.nspname = t.table_schema
    LEFT JOIN pg_class c ON c.relname = t.table_name AND c.relnamespace = n.oid
    WHERE t.table_type = 'BASE TABLE'
    AND t.table_schema = ANY($1)
    AND has_table_privilege(quote_ident(t.table_schema) || '.' || quote_ident(t.table_name), 'SELECT')
    ORDER BY t.table_schema, t.table_name
"#;

const COLUMNS_QUERY: &str = r#"
    SELECT
        c.column_name::text AS column_name,
        CASE
            WHEN c.data_type = 'USER-DEFINED' THEN c.udt_name::text
            WHEN c.data_type = 'ARRAY' THEN substring(c.udt_name::text from 2) || '[]'
            ELSE c.data_type::text
        END AS data_type,
        c.is_nullable::text AS is_nullable,
        c.column_default::text AS column_default,
        c.ordinal_position::integer AS ordinal_position,
        col_description(pgc.oid, c.ordinal_position::integer) AS column_comment
    FROM information_schema.columns c
    LEFT JOIN pg_namespace pgn ON pgn.nspname = c.table_schema
    LEFT JOIN pg_class pgc ON pgc.relname = c.table_name AND pgc.relnamespace = pgn.oid
    WHERE c.table_name = $1
    AND c.table_schema = $2
    ORDER BY c.ordinal_position
"#;

const PRIMARY_KEY_QUERY: &str = r#"
    SELECT
        array_agg(kcu.column_name::text ORDER BY kcu.ordinal_position) AS columns
    FROM information_schema.table_constraints tc
    JOIN information_schema.key_column_usage kcu
        ON tc.constraint_name = kcu.constraint_name
        AND tc.table_schema = kcu.table_schema
        AND tc.table_name = kcu.table_name
    WHERE tc.constraint_type = 'PRIMARY KEY'
    AND tc.table_name = $1
    AND tc.table_schema = $2
    GROUP BY tc.constraint_name
"#;

const FOREIGN_KEYS_QUERY: &str = r#"
    SELECT
        con.conname::text AS constraint_name,
        a.attname::text AS column_name,
        fns.nspname::text AS referenced_table_schema,
        fcl.relname::text AS referenced_table_name,
        fa.attname::text AS referenced_column_name
    FROM pg_constraint con
    JOIN pg_class cl ON con.conrelid = cl.oid
    JOIN pg_namespace ns ON cl.relnamespace = ns.oid
    JOIN pg_class fcl ON con.confrelid = fcl.oid
    JOIN pg_namespace fns ON fcl.relnamespace = fns.oid
    JOIN pg_attribute a ON a.attrelid = con.conrelid
    JOIN pg_attribute fa ON fa.attrelid = con.confrelid
    WHERE con.contype = 'f'
    AND cl.relname = $1
    AND ns.nspname = $2
    AND a.attnum = ANY(con.conkey)
    AND fa.attnum = ANY(con.confkey)
    AND array_position(con.conkey, a.attnum) = array_position(con.confkey, fa.attnum)
    ORDER BY con.conname, array_position(con.conkey, a.attnum)
"#;

const INDEXES_QUERY: &str = r#"
    SELECT
        i.relname::text AS index_name,
        am.amname::text AS index_type,
        ix.indisunique AS is_unique,
        ix.indisprimary AS is_primary,
        array_agg(a.attname::text ORDER BY array_position(ix.indkey, a.attnum)) AS columns
    FROM pg_index ix
    JOIN pg_class t ON t.oid = ix.indrelid
    JOIN pg_class i ON i.oid = ix.indexrelid
    JOIN pg_namespace n ON n.oid = t.relnamespace
    JOIN pg_am am ON am.oid = i.relam
    JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey)
    WHERE t.relname = $1
    AND n.nspname = $2
    GROUP BY i.relname, am.amname, ix.indisunique, ix.indisprimary
    ORDER BY i.relname
"#;

const VIEWS_QUERY: &str = r#"
    SELECT
        v.schemaname::text AS schema_name,
        v.viewname::text AS view_name,
        obj_description(c.oid, 'pg_class') AS view_comment
    FROM pg_views v
    LEFT JOIN pg_namespace n ON n.nspname = v.schemaname
    LEFT JOIN pg_class c ON c.relname = v.viewname AND c.relnamespace = n.oid
    WHERE v.schemaname = ANY($1)
    ORDER BY v.schemaname, v.viewname
"#;

const ENUM_TYPES_QUERY: &str = r#"
    SELECT
        n.nspname::text AS schema_name,
        t.typname::text AS type_name,
        array_agg(e.enumlabel::text ORDER BY e.enumsortorder) AS labels
    FROM pg_type t
    JOIN pg_enum e ON e.enumtypid = t.oid
    JOIN pg_namespace n ON n.oid = t.typnamespace
    WHERE n.nspname = ANY($1)
    GROUP BY n.nspname, t.typname
    ORDER BY n.nspname, t.typname
"#;

#[async_trait]
impl SchemaIntrospector for PostgresAdapter {
    async fn list_tables(&self, database: &str) -> Result<Vec<TableInfo>> {
        let handle = self.handle(database)?;
        tracing::debug!("Starting table enumeration for '{}'", database);

        let rows = sqlx::query(TABLES_QUERY)
            .bind(&handle.config.schemas)
            .fetch_all(&handle.pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to enumerate tables: {}", e);
                collection_error("tables", database, e)
            })?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in &rows {
            let schema: String = row.get_field("table_schema", None)?;
            let name: String = row.get_field("table_name", None)?;
            let mut table = TableInfo::new(schema, name);
            table.comment = row.get_field("table_comment", Some(&table.name))?;
            table.row_count_estimate =
                row_estimate(row.get_field("estimated_rows", Some(&table.name))?);
            tables.push(table);
        }

        tracing::info!("Found {} tables in '{}'", tables.len(), database);
        Ok(tables)
    }

    async fn columns(&self, database: &str, table: &TableInfo) -> Result<Vec<ColumnInfo>> {
        let pool = self.pool(database)?;
        collect_columns(pool, &table.schema, &table.name).await
    }

    async fn primary_key(&self, database: &str, table: &TableInfo) -> Result<Vec<String>> {
        let pool = self.pool(database)?;
        let qualified = table.qualified_name();

        let row = sqlx::query(PRIMARY_KEY_QUERY)
            .bind(&table.name)
            .bind(&table.schema)
            .fetch_optional(pool)
            .await
            .map_err(|e| collection_error(&format!("primary key for table '{}'", qualified), database, e))?;

        match row {
            Some(row) => row.get_field("columns", Some(&qualified)),
            None => Ok(Vec::new()),
        }
    }

    async fn foreign_keys(&self, database: &str, table: &TableInfo) -> Result<Vec<ForeignKeyInfo>> {
        let pool = self.pool(database)?;
        let qualified = table.qualified_name();

        let rows = sqlx::query(FOREIGN_KEYS_QUERY)
            .bind(&table.name)
            .bind(&table.schema)
            .fetch_all(pool)
            .await
            .map_err(|e| collection_error(&format!("foreign keys for table '{}'", qualified), database, e))?;

        // Rows arrive ordered by constraint, then key position
        let mut grouped: BTreeMap<String, ForeignKeyInfo> = BTreeMap::new();
        for row in &rows {
            let constraint: String = row.get_field("constraint_name", Some(&qualified))?;
            let column: String = row.get_field("column_name", Some(&qualified))?;
            let referenced_column: String =
                row.get_field("referenced_column_name", Some(&qualified))?;
            let referenced_schema: String =
                row.get_field("referenced_table_schema", Some(&qualified))?;
            let referenced_table: String =
                row.get_field("referenced_table_name", Some(&qualified))?;

            let fk = grouped
                .entry(constraint.clone())
                .or_insert_with(|| ForeignKeyInfo {
                    name: Some(constraint),
                    columns: Vec::new(),
                    referenced_schema,
                    referenced_table,
                    referenced_columns: Vec::new(),
                });
            fk.columns.push(column);
            fk.referenced_columns.push(referenced_column);
        }

        Ok(grouped.into_values().collect())
    }

    async fn indexes(&self, database: &str, table: &TableInfo) -> Result<Vec<IndexInfo>> {
        let pool = self.pool(database)?;
        let qualified = table.qualified_name();

        let rows = sqlx::query(INDEXES_QUERY)
            .bind(&table.name)
            .bind(&table.schema)
            .fetch_all(pool)
            .await
            .map_err(|e| collection_error(&format!("indexes for table '{}'", qualified), database, e))?;

        let mut indexes = Vec::with_capacity(rows.len());
        for row in &rows {
            indexes.push(IndexInfo {
                name: row.get_field("index_name", Some(&qualified))?,
                columns: row.get_field("columns", Some(&qualified))?,
                is_unique: row.get_field("is_unique", Some(&qualified))?,
                is_primary: row.get_field("is_primary", Some(&qualified))?,
                index_type: Some(row.get_field("index_type", Some(&qualified))?),
            });
        }
        Ok(indexes)
    }

    async fn views(&self, database: &str) -> Result<Vec<ViewInfo>> {
        let handle = self.handle(database)?;

        let rows = sqlx::query(VIEWS_QUERY)
            .bind(&handle.config.schemas)
            .fetch_all(&handle.pool)
            .await
            .map_err(|e| collection_error("views", database, e))?;

        let mut views = Vec::with_capacity(rows.len());
        for row in &rows {
            let schema: String = row.get_field("schema_name", Some("pg_views"))?;
            let name: String = row.get_field("view_name", Some("pg_views"))?;
            let comment: Option<String> = row.get_field("view_comment", Some("pg_views"))?;
            let columns = collect_columns(&handle.pool, &schema, &name).await?;

            tracing::debug!("Collected view '{}.{}' with {} columns", schema, name, columns.len());
            views.push(ViewInfo {
                schema,
                name,
                columns,
                comment,
            });
        }
        Ok(views)
    }

    async fn enum_types(&self, database: &str) -> Result<Vec<EnumTypeInfo>> {
        let handle = self.handle(database)?;

        let rows = sqlx::query(ENUM_TYPES_QUERY)
            .bind(&handle.config.schemas)
            .fetch_all(&handle.pool)
            .await
            .map_err(|e| collection_error("enum types", database, e))?;

        rows.iter()
            .map(|row| {
                Ok(EnumTypeInfo {
                    schema: row.get_field("schema_name", Some("pg_type"))?,
                    name: row.get_field("type_name", Some("pg_type"))?,
                    values: row.get_field("labels", Some("pg_type"))?,
                })
            })
            .collect()
    }
}

async fn collect_columns(pool: &PgPool, schema: &str, name: &str) -> Result<Vec<ColumnInfo>> {
    let qualified = format!("{}.{}", schema, name);

    let rows = sqlx::query(COLUMNS_QUERY)
        .bind(name)
        .bind(schema)
        .fetch_all(pool)
        .await
        .map_err(|e| {
            QueryGateError::collection_failed(format!("columns for '{}'", qualified), e)
        })?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in &rows {
        let name: String = row.get_field("column_name", Some(&qualified))?;
        let data_type: String = row.get_field("data_type", Some(&qualified))?;
        let ordinal: i32 = row.get_field("ordinal_position", Some(&qualified))?;
        let is_nullable: String = row.get_field("is_nullable", Some(&qualified))?;

        let mut column = ColumnInfo::new(name, data_type, u32::try_from(ordinal).unwrap_or(0));
        column.is_nullable = is_nullable == "YES";
        column.default_value = row.get_field("column_default", Some(&qualified))?;
        column.comment = row.get_field("column_comment", Some(&qualified))?;
        columns.push(column);
    }
    Ok(columns)
}

/// Introspection failures keep the transient/permanent split of the
/// executor so the cache can log them meaningfully.
fn collection_error(what: &str, database: &str, error: sqlx::Error) -> QueryGateError {
    let transient = match &error {
        sqlx::Error::Database(db_err) => db_err
            .code()
            .is_some_and(|code| super::executor::is_transient_sqlstate(&code)),
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        _ => false,
    };
    let err = QueryGateError::collection_failed(format!("{} of '{}'", what, database), error);
    if transient { err } else { err.permanent() }
}
