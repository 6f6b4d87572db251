//! PostgreSQL adapter: schema introspection and read-only execution.
//!
//! # Module Structure
//! - `connection`: Connection pool management and validation
//! - `introspection`: Catalog queries implementing [`SchemaIntrospector`]
//! - `executor`: Read-only execution implementing [`SqlExecutor`]
//!
//! # Security Guarantees
//! - Every session defaults to read-only transactions
//! - Every execution runs in an explicit read-only transaction with its own
//!   statement timeout and is rolled back afterwards
//! - Connection strings are redacted in error messages and logs
//!
//! [`SchemaIntrospector`]: crate::adapters::SchemaIntrospector
//! [`SqlExecutor`]: crate::adapters::SqlExecutor

mod connection;
mod executor;
mod introspection;


use crate::config::DatabaseConfig;
use sqlx::PgPool;
use std::collections::HashMap;

pub use connection::PoolStats;

/// Pool and settings for one configured database.
pub(crate) struct DatabaseHandle {
    pub(crate) pool: PgPool,
    pub(crate) config: DatabaseConfig,
}

/// PostgreSQL adapter serving every configured database.
pub struct PostgresAdapter {
    databases: HashMap<String, DatabaseHandle>,
}

impl std::fmt::Debug for PostgresAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("PostgresAdapter");
        for name in self.database_names() {
            if let Some(handle) = self.databases.get(&name) {
                debug.field(&name, &handle.config);
            }
        }
        debug.finish()
    }
}
