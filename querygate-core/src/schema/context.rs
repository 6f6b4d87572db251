//! Text summary of a schema for the SQL generator.

use std::fmt::Write;

use crate::models::{DatabaseSchema, TableInfo};

/// Renders a bounded summary of `schema`.
///
/// At most `max_tables` tables are included, in snapshot order; the rest are
/// counted in a trailing line. Views and enum types follow the tables under
/// the same cap.
pub fn render_context(schema: &DatabaseSchema, max_tables: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Database: {}", schema.name);

    for table in schema.tables.iter().take(max_tables) {
        out.push('\n');
        render_table(&mut out, table);
    }
    note_omitted(&mut out, "tables", schema.tables.len(), max_tables);

    if !schema.views.is_empty() {
        out.push_str("\nViews:\n");
        for view in schema.views.iter().take(max_tables) {
            let columns: Vec<&str> = view.columns.iter().map(|c| c.name.as_str()).collect();
            let _ = write!(out, "  {}.{}({})", view.schema, view.name, columns.join(", "));
            if let Some(comment) = &view.comment {
                let _ = write!(out, " -- {}", comment);
            }
            out.push('\n');
        }
        note_omitted(&mut out, "views", schema.views.len(), max_tables);
    }

    if !schema.enum_types.is_empty() {
        out.push_str("\nEnum types:\n");
        for enum_type in schema.enum_types.iter().take(max_tables) {
            let values: Vec<String> = enum_type
                .values
                .iter()
                .map(|v| format!("'{}'", v))
                .collect();
            let _ = writeln!(
                out,
                "  {}.{}: {}",
                enum_type.schema,
                enum_type.name,
                values.join(", ")
            );
        }
        note_omitted(&mut out, "enum types", schema.enum_types.len(), max_tables);
    }

    out
}

fn note_omitted(out: &mut String, what: &str, total: usize, shown: usize) {
    let omitted = total.saturating_sub(shown);
    if omitted > 0 {
        let _ = writeln!(out, "\n... {} more {} not shown", omitted, what);
    }
}

fn render_table(out: &mut String, table: &TableInfo) {
    let _ = write!(out, "Table: {}", table.qualified_name());
    if let Some(rows) = table.row_count_estimate {
        let _ = write!(out, " (~{} rows)", rows);
    }
    if let Some(comment) = &table.comment {
        let _ = write!(out, " -- {}", comment);
    }
    out.push('\n');

    for column in &table.columns {
        let _ = write!(out, "  {} {}", column.name, column.data_type);
        if !column.is_nullable {
            out.push_str(" NOT NULL");
        }
        if column.is_primary_key {
            out.push_str(" PRIMARY KEY");
        }
        if let Some(comment) = &column.comment {
            let _ = write!(out, " -- {}", comment);
        }
        out.push('\n');
    }

    for fk in &table.foreign_keys {
        let _ = writeln!(
            out,
            "  FOREIGN KEY ({}) REFERENCES {}.{}({})",
            fk.columns.join(", "),
            fk.referenced_schema,
            fk.referenced_table,
            fk.referenced_columns.join(", ")
        );
    }
}
