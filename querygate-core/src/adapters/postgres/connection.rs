//! PostgreSQL connection pool management and validation.
//!
//! # Security Features
//! - Validates connection string format and parameters
//! - Enforces connection limits to prevent resource exhaustion
//! - Applies read-only session settings to every pooled connection

use super::{DatabaseHandle, PostgresAdapter};
use crate::Result;
use crate::config::DatabaseConfig;
use crate::error::{ErrorKind, QueryGateError, redact_database_url};
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// Session-wide statement timeout; executions tighten it per transaction.
const SESSION_STATEMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Pool statistics for one configured database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of idle connections ready to be used
    pub idle_connections: u32,
    /// Number of connections currently in use
    pub active_connections: u32,
    /// Maximum allowed connections (from configuration)
    pub max_connections: u32,
}

impl PostgresAdapter {
    /// Creates pools for every configured database.
    ///
    /// Pools connect lazily, so this succeeds without a reachable server;
    /// connection problems surface on first use.
    ///
    /// # Errors
    /// Returns a configuration error if any URL is invalid or not PostgreSQL.
    pub fn from_config(databases: &[DatabaseConfig]) -> Result<Self> {
        let mut handles = HashMap::with_capacity(databases.len());
        for config in databases {
            config.validate()?;
            let pool = Self::create_connection_pool(config)?;
            tracing::debug!(
                "Created lazy pool for '{}' ({})",
                config.name,
                config.redacted_url()
            );
            handles.insert(
                config.name.clone(),
                DatabaseHandle {
                    pool,
                    config: config.clone(),
                },
            );
        }
        Ok(Self { databases: handles })
    }

    /// Pool for a configured database.
    ///
    /// # Errors
    /// Returns a permanent `BAD_REQUEST` error for an unknown name.
    pub fn pool(&self, database: &str) -> Result<&PgPool> {
        self.handle(database).map(|h| &h.pool)
    }

    pub(crate) fn handle(&self, database: &str) -> Result<&DatabaseHandle> {
        self.databases.get(database).ok_or_else(|| {
            QueryGateError::new(
                ErrorKind::BadRequest,
                format!("Database '{}' is not configured", database),
            )
        })
    }

    /// Names of the configured databases, sorted
    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.databases.keys().cloned().collect();
        names.sort();
        names
    }

    /// Pool statistics for `database`.
    ///
    /// # Errors
    /// Returns an error for an unknown name.
    pub fn pool_statistics(&self, database: &str) -> Result<PoolStats> {
        let handle = self.handle(database)?;
        let size = handle.pool.size();
        let idle = u32::try_from(handle.pool.num_idle()).unwrap_or(u32::MAX);
        Ok(PoolStats {
            idle_connections: idle,
            active_connections: size.saturating_sub(idle),
            max_connections: handle.config.max_connections,
        })
    }

    /// Closes every pool gracefully.
    pub async fn close(&self) {
        for handle in self.databases.values() {
            handle.pool.close().await;
        }
    }

    /// Creates a lazy connection pool with read-only session settings.
    ///
    /// # Security Features
    /// - Caps the pool at the configured size (at most 100)
    /// - Applies session settings to every new connection via `after_connect`
    /// - Defaults every transaction to read-only
    /// - Pins `search_path` to the configured schemas
    pub(crate) fn create_connection_pool(config: &DatabaseConfig) -> Result<PgPool> {
        use sqlx::Executor;

        Self::validate_connection_string(config.url())?;

        let statement_timeout_secs = SESSION_STATEMENT_TIMEOUT.as_secs();
        let search_path = format!("SET search_path TO {}", config.search_path());

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.max_connections.min(100))
            .min_connections(0)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(3600))
            .test_before_acquire(true)
            .after_connect(move |conn, _meta| {
                let search_path = search_path.clone();
                Box::pin(async move {
                    conn.execute(
                        format!("SET statement_timeout = '{}s'", statement_timeout_secs).as_str(),
                    )
                    .await?;

                    conn.execute("SET lock_timeout = '10s'").await?;

                    conn.execute("SET idle_in_transaction_session_timeout = '60s'")
                        .await?;

                    let app_name = format!("querygate-{}", env!("CARGO_PKG_VERSION"));
                    conn.execute(format!("SET application_name = '{}'", app_name).as_str())
                        .await?;

                    conn.execute("SET default_transaction_read_only = on")
                        .await?;

                    conn.execute("SET timezone = 'UTC'").await?;

                    // Unqualified names resolve only within the configured schemas
                    conn.execute(search_path.as_str()).await?;

                    Ok(())
                })
            })
            .connect_lazy(config.url())
            .map_err(|e| {
                QueryGateError::configuration(format!(
                    "Failed to create PostgreSQL connection pool to {}",
                    redact_database_url(config.url())
                ))
                .with_source(e)
            })?;

        Ok(pool)
    }

    /// Validates connection string format and security requirements.
    ///
    /// # Errors
    /// Returns a configuration error if the URL cannot be parsed, uses a
    /// scheme other than `postgres://` / `postgresql://`, has no host, or
    /// requests a statement timeout above 300 seconds.
    pub fn validate_connection_string(connection_string: &str) -> Result<()> {
        let url = Url::parse(connection_string).map_err(|e| {
            QueryGateError::configuration(format!(
                "Invalid PostgreSQL connection string format: {}",
                e
            ))
        })?;

        if !matches!(url.scheme(), "postgres" | "postgresql") {
            return Err(QueryGateError::configuration(
                "Connection string must use postgres:// or postgresql:// scheme",
            ));
        }

        if url.host_str().is_none() {
            return Err(QueryGateError::configuration(
                "Connection string must specify a host",
            ));
        }

        for (key, value) in url.query_pairs() {
            if key == "statement_timeout"
                && let Ok(timeout_ms) = value.parse::<u64>()
                && timeout_ms > 300_000
            {
                return Err(QueryGateError::configuration(
                    "statement_timeout should not exceed 300 seconds",
                ));
            }
        }

        Ok(())
    }
}
