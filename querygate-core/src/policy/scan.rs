//! AST walk that gathers everything the policy checks need.

use sqlparser::ast::{
    Expr, FunctionArg, FunctionArgExpr, FunctionArguments, ObjectName, Query, Select, SelectItem,
    SetExpr, Statement, TableFactor, Visit, Visitor,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::ops::ControlFlow;

use super::pattern::normalize_name;

/// A base-table reference.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct TableRef {
    /// Name as written, normalized (`schema.table` or `table`)
    pub(crate) full: String,
    /// Last name segment
    pub(crate) bare: String,
}

impl TableRef {
    fn from_name(name: &str) -> Self {
        let full = normalize_name(name);
        let bare = full.rsplit('.').next().unwrap_or(&full).to_string();
        Self { full, bare }
    }
}

/// A column reference, optionally qualified by a table or alias.
#[derive(Debug, Clone)]
pub(crate) struct ColumnRef {
    pub(crate) qualifier: Option<String>,
    pub(crate) name: String,
}

/// Projection wildcard of one SELECT.
#[derive(Debug, Clone)]
pub(crate) enum Wildcard {
    /// `*`
    All,
    /// `qualifier.*`
    Qualified(String),
}

/// Facts about one SELECT block.
#[derive(Debug, Clone, Default)]
pub(crate) struct SelectFacts {
    /// Base tables read directly by this block's FROM clause
    pub(crate) tables: Vec<TableRef>,
    pub(crate) has_where: bool,
    pub(crate) wildcards: Vec<Wildcard>,
}

/// Everything collected from one statement.
#[derive(Debug, Default)]
pub(crate) struct StatementFacts {
    pub(crate) tables: Vec<TableRef>,
    pub(crate) cte_names: HashSet<String>,
    pub(crate) aliases: HashMap<String, BTreeSet<String>>,
    pub(crate) functions: Vec<String>,
    pub(crate) columns: Vec<ColumnRef>,
    pub(crate) selects: Vec<SelectFacts>,
    /// Qualifiers of `t.*` used inside expressions, e.g. `row_to_json(t.*)`
    pub(crate) expression_wildcards: Vec<String>,
    /// First structural problem found in a nested query
    pub(crate) nested_violation: Option<String>,
}

impl StatementFacts {
    /// Walks `statement` and collects its facts.
    pub(crate) fn collect(statement: &Statement) -> Self {
        let mut facts = Self::default();
        let _ = statement.visit(&mut facts);
        facts
    }

    /// Distinct base tables, excluding references to CTEs.
    pub(crate) fn distinct_tables(&self) -> BTreeSet<&str> {
        self.tables
            .iter()
            .filter(|t| !self.cte_names.contains(&t.full))
            .map(|t| t.full.as_str())
            .collect()
    }

    /// Resolves a column qualifier to the tables it may stand for.
    pub(crate) fn resolve_qualifier(&self, qualifier: &str) -> Vec<TableRef> {
        if let Some(tables) = self.aliases.get(qualifier) {
            return tables.iter().map(|t| TableRef::from_name(t)).collect();
        }
        let wanted = TableRef::from_name(qualifier);
        let mut matches: Vec<TableRef> = self
            .tables
            .iter()
            .filter(|t| t.full == wanted.full || t.bare == wanted.full)
            .cloned()
            .collect();
        if matches.is_empty() {
            matches.push(wanted);
        }
        matches
    }

    fn violation(&mut self, reason: String) {
        if self.nested_violation.is_none() {
            self.nested_violation = Some(reason);
        }
    }

    fn collect_argument_wildcards(&mut self, arguments: &FunctionArguments) {
        let FunctionArguments::List(list) = arguments else {
            return;
        };
        for arg in &list.args {
            let arg = match arg {
                FunctionArg::Named { arg, .. }
                | FunctionArg::ExprNamed { arg, .. }
                | FunctionArg::Unnamed(arg) => arg,
            };
            // A bare `*` argument (`count(*)`) reads no column values
            if let FunctionArgExpr::QualifiedWildcard(prefix) = arg {
                self.expression_wildcards.push(object_qualifier(prefix));
            }
        }
    }

    fn collect_set_expr(&mut self, body: &SetExpr) {
        match body {
            SetExpr::Select(select) => self.collect_select(select),
            SetExpr::SetOperation { left, right, .. } => {
                self.collect_set_expr(left);
                self.collect_set_expr(right);
            }
            // Nested queries are visited on their own
            SetExpr::Query(_) | SetExpr::Values(_) => {}
            other => self.violation(format!(
                "Data-modifying statement inside a query is not allowed: {}",
                leading_keywords(&other.to_string())
            )),
        }
    }

    fn collect_select(&mut self, select: &Select) {
        if select.into.is_some() {
            self.violation("SELECT INTO is not allowed".to_string());
        }

        let mut tables = Vec::new();
        for table_with_joins in &select.from {
            collect_relation(&table_with_joins.relation, &mut tables);
            for join in &table_with_joins.joins {
                collect_relation(&join.relation, &mut tables);
            }
        }

        let wildcards = select
            .projection
            .iter()
            .filter_map(|item| match item {
                SelectItem::Wildcard(_) => Some(Wildcard::All),
                SelectItem::QualifiedWildcard(..) => Some(qualified_wildcard(item)),
                _ => None,
            })
            .collect();

        self.selects.push(SelectFacts {
            tables,
            has_where: select.selection.is_some(),
            wildcards,
        });
    }
}

impl Visitor for StatementFacts {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.cte_names.insert(normalize_name(&cte.alias.name.value));
            }
        }
        if !query.locks.is_empty() {
            self.violation("Row locking clauses (FOR UPDATE / FOR SHARE) are not allowed".to_string());
        }
        self.collect_set_expr(&query.body);
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<Self::Break> {
        match factor {
            TableFactor::Table {
                name, alias, args, ..
            } => {
                if args.is_some() {
                    // Table-valued function call in FROM
                    self.functions.push(function_name(&name.to_string()));
                } else {
                    let table = TableRef::from_name(&name.to_string());
                    if let Some(alias) = alias {
                        self.aliases
                            .entry(normalize_name(&alias.name.value))
                            .or_default()
                            .insert(table.full.clone());
                    }
                    self.tables.push(table);
                }
            }
            TableFactor::Function { name, .. } => {
                self.functions.push(function_name(&name.to_string()));
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        match expr {
            Expr::Function(function) => {
                self.functions.push(function_name(&function.name.to_string()));
                for arguments in [&function.args, &function.parameters] {
                    self.collect_argument_wildcards(arguments);
                }
            }
            Expr::QualifiedWildcard(prefix, _) => {
                self.expression_wildcards.push(object_qualifier(prefix));
            }
            Expr::Identifier(ident) => self.columns.push(ColumnRef {
                qualifier: None,
                name: normalize_name(&ident.value),
            }),
            Expr::CompoundIdentifier(parts) => {
                if let Some((last, qualifier)) = parts.split_last() {
                    let qualifier = qualifier
                        .iter()
                        .map(|p| normalize_name(&p.value))
                        .collect::<Vec<_>>()
                        .join(".");
                    self.columns.push(ColumnRef {
                        qualifier: (!qualifier.is_empty()).then_some(qualifier),
                        name: normalize_name(&last.value),
                    });
                }
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

fn collect_relation(factor: &TableFactor, out: &mut Vec<TableRef>) {
    match factor {
        TableFactor::Table { name, args, .. } if args.is_none() => {
            out.push(TableRef::from_name(&name.to_string()));
        }
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => {
            collect_relation(&table_with_joins.relation, out);
            for join in &table_with_joins.joins {
                collect_relation(&join.relation, out);
            }
        }
        _ => {}
    }
}

fn object_qualifier(name: &ObjectName) -> String {
    normalize_name(&name.to_string())
}

fn qualified_wildcard(item: &SelectItem) -> Wildcard {
    let rendered = item.to_string();
    match rendered.split_once(".*") {
        Some((qualifier, _)) if !qualifier.is_empty() => {
            Wildcard::Qualified(normalize_name(qualifier))
        }
        _ => Wildcard::All,
    }
}

/// Lower-cased function name without schema qualification.
pub(crate) fn function_name(name: &str) -> String {
    let normalized = normalize_name(name);
    normalized
        .rsplit('.')
        .next()
        .unwrap_or(&normalized)
        .to_string()
}

/// Human-readable statement kind taken from its leading keywords,
/// e.g. `DELETE` or `CREATE TABLE`.
pub(crate) fn leading_keywords(rendered: &str) -> String {
    let mut words = rendered.split_whitespace();
    let first = words.next().unwrap_or("UNKNOWN").to_uppercase();
    match first.as_str() {
        "CREATE" | "DROP" | "ALTER" => match words.next() {
            Some(second) => format!("{} {}", first, second.to_uppercase()),
            None => first,
        },
        _ => first,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::dialect::PostgreSqlDialect;
    use sqlparser::parser::Parser;

    fn facts(sql: &str) -> StatementFacts {
        let statements = Parser::parse_sql(&PostgreSqlDialect {}, sql).unwrap();
        StatementFacts::collect(&statements[0])
    }

    #[test]
    fn test_collects_tables_aliases_and_ctes() {
        let facts = facts(
            "WITH recent AS (SELECT * FROM public.orders WHERE id > 10) \
             SELECT u.name FROM users u JOIN recent r ON r.user_id = u.id",
        );

        let names: Vec<&str> = facts.tables.iter().map(|t| t.full.as_str()).collect();
        assert!(names.contains(&"public.orders"));
        assert!(names.contains(&"users"));
        assert!(facts.cte_names.contains("recent"));
        assert_eq!(
            facts.distinct_tables().into_iter().collect::<Vec<_>>(),
            vec!["public.orders", "users"]
        );
        assert_eq!(facts.resolve_qualifier("u")[0].full, "users");
    }

    #[test]
    fn test_collects_nested_functions() {
        let facts = facts("SELECT upper(lower(pg_catalog.PG_SLEEP(1)::text))");
        assert!(facts.functions.contains(&"pg_sleep".to_string()));
        assert!(facts.functions.contains(&"upper".to_string()));
    }

    #[test]
    fn test_select_facts() {
        let facts = facts("SELECT o.* FROM orders o WHERE o.total > 5");
        assert_eq!(facts.selects.len(), 1);
        let select = &facts.selects[0];
        assert!(select.has_where);
        assert_eq!(select.tables[0].bare, "orders");
        assert!(matches!(&select.wildcards[0], Wildcard::Qualified(q) if q == "o"));
    }

    #[test]
    fn test_collects_wildcards_inside_expressions() {
        let bare = facts("SELECT row_to_json(u.*), count(*) FROM users u");
        assert_eq!(bare.expression_wildcards, vec!["u".to_string()]);
        assert!(bare.selects[0].wildcards.is_empty());

        let qualified = facts("SELECT json_agg(public.users.*) FROM public.users");
        assert_eq!(qualified.expression_wildcards, vec!["public.users".to_string()]);
    }

    #[test]
    fn test_leading_keywords() {
        assert_eq!(leading_keywords("delete from users"), "DELETE");
        assert_eq!(leading_keywords("CREATE TABLE t (id int)"), "CREATE TABLE");
        assert_eq!(leading_keywords(""), "UNKNOWN");
    }

    #[test]
    fn test_function_name_strips_schema() {
        assert_eq!(function_name("pg_catalog.\"PG_READ_FILE\""), "pg_read_file");
    }
}
