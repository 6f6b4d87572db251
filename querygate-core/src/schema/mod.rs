//! Per-database schema snapshots.
//!
//! Each database maps to an `Arc<DatabaseSchema>`. Loads build a complete new
//! snapshot off to the side and swap it in under a short write lock, so a
//! reader holding the previous `Arc` is never affected and never sees a
//! partially built schema. A failed refresh leaves the old snapshot in place.

mod context;

pub use context::render_context;

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::Result;
use crate::adapters::SchemaIntrospector;
use crate::config::AppConfig;
use crate::error::QueryGateError;
use crate::models::{DatabaseSchema, TableInfo};

const LOAD_CONCURRENCY: usize = 4;

/// Outcome of loading several databases.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Databases whose snapshot is now current
    pub loaded: Vec<String>,
    /// Databases that failed, with the error
    pub failed: Vec<(String, QueryGateError)>,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Shared schema cache.
pub struct SchemaCache {
    introspector: Arc<dyn SchemaIntrospector>,
    snapshots: RwLock<HashMap<String, Arc<DatabaseSchema>>>,
}

impl std::fmt::Debug for SchemaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaCache")
            .field("databases", &self.databases())
            .finish()
    }
}

impl SchemaCache {
    /// Creates an empty cache backed by `introspector`.
    pub fn new(introspector: Arc<dyn SchemaIntrospector>) -> Self {
        Self {
            introspector,
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    /// Current snapshot for `database`, if one has been loaded.
    pub fn get(&self, database: &str) -> Option<Arc<DatabaseSchema>> {
        self.snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(database)
            .cloned()
    }

    /// One table from the current snapshot.
    pub fn get_table(&self, database: &str, table: &str) -> Option<TableInfo> {
        self.get(database)?.table(table).cloned()
    }

    /// Names of databases with a loaded snapshot, sorted
    pub fn databases(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Drops the snapshot for `database`; returns whether one existed.
    pub fn invalidate(&self, database: &str) -> bool {
        let removed = self
            .snapshots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(database)
            .is_some();
        if removed {
            tracing::info!("Invalidated schema snapshot for '{}'", database);
        }
        removed
    }

    /// Installs a prebuilt snapshot, replacing any existing one.
    pub fn insert(&self, schema: DatabaseSchema) -> Arc<DatabaseSchema> {
        let schema = Arc::new(schema);
        self.snapshots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(schema.name.clone(), Arc::clone(&schema));
        schema
    }

    /// Introspects `database` and installs the new snapshot.
    ///
    /// # Errors
    /// Returns the introspection error when tables or columns cannot be
    /// listed. The cache is left unchanged in that case.
    pub async fn load(&self, database: &str) -> Result<Arc<DatabaseSchema>> {
        let schema = self.build_snapshot(database).await?;
        Ok(self.insert(schema))
    }

    /// Reloads `database`, keeping the previous snapshot if the reload fails.
    ///
    /// # Errors
    /// Returns the introspection error after logging it; [`Self::get`] keeps
    /// returning the previous snapshot.
    pub async fn refresh(&self, database: &str) -> Result<Arc<DatabaseSchema>> {
        match self.load(database).await {
            Ok(schema) => Ok(schema),
            Err(e) => {
                if self.get(database).is_some() {
                    tracing::warn!(
                        "Schema refresh for '{}' failed, serving previous snapshot: {}",
                        database,
                        e
                    );
                } else {
                    tracing::warn!("Schema refresh for '{}' failed: {}", database, e);
                }
                Err(e)
            }
        }
    }

    /// Loads every database independently; one failure never blocks the
    /// others.
    pub async fn load_all(&self, databases: &[String]) -> LoadReport {
        let results: Vec<(String, Result<Arc<DatabaseSchema>>)> = stream::iter(databases)
            .map(|name| async move { (name.clone(), self.load(name).await) })
            .buffer_unordered(LOAD_CONCURRENCY)
            .collect()
            .await;

        let mut report = LoadReport::default();
        for (name, result) in results {
            match result {
                Ok(_) => report.loaded.push(name),
                Err(e) => {
                    tracing::error!("Schema for '{}' is unavailable: {}", name, e);
                    report.failed.push((name, e));
                }
            }
        }
        report.loaded.sort();
        report.failed.sort_by(|a, b| a.0.cmp(&b.0));

        tracing::info!(
            "Loaded {} of {} database schemas",
            report.loaded.len(),
            databases.len()
        );
        report
    }

    /// Refreshes every database in `databases`, serving stale on failure.
    pub async fn refresh_all(&self, databases: &[String]) -> LoadReport {
        let mut report = LoadReport::default();
        for name in databases {
            match self.refresh(name).await {
                Ok(_) => report.loaded.push(name.clone()),
                Err(e) => report.failed.push((name.clone(), e)),
            }
        }
        report
    }

    /// Spawns a background task refreshing `databases` every `interval`.
    ///
    /// The first refresh happens one interval after the call. The task stops
    /// when the returned handle is shut down or dropped.
    pub fn start_refresh_task(
        self: &Arc<Self>,
        databases: Vec<String>,
        interval: Duration,
    ) -> RefreshHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let cache = Arc::clone(self);

        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now()
                .checked_add(interval)
                .unwrap_or_else(tokio::time::Instant::now);
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tracing::debug!("Refreshing {} schema snapshots", databases.len());
                        cache.refresh_all(&databases).await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Schema refresh task stopped");
        });

        RefreshHandle {
            shutdown: shutdown_tx,
            task: Some(task),
        }
    }

    /// Starts the refresh timer when `cache.refresh_interval_secs` is set.
    pub fn start_configured_refresh(self: &Arc<Self>, config: &AppConfig) -> Option<RefreshHandle> {
        let interval = config.cache.refresh_interval()?;
        tracing::info!(
            "Refreshing {} schema snapshots every {}s",
            config.databases.len(),
            interval.as_secs()
        );
        Some(self.start_refresh_task(config.database_names(), interval))
    }

    async fn build_snapshot(&self, database: &str) -> Result<DatabaseSchema> {
        let start_time = Instant::now();
        let mut warnings = Vec::new();

        tracing::debug!("Enumerating tables for '{}'", database);
        let mut tables = match self.introspector.list_tables(database).await {
            Ok(tables) => tables,
            Err(e) => {
                tracing::error!("Failed to collect tables for '{}': {}", database, e);
                return Err(e);
            }
        };
        tables.sort_by(|a, b| (&a.schema, &a.name).cmp(&(&b.schema, &b.name)));

        for table in &mut tables {
            self.fill_table(database, table, &mut warnings).await?;
        }

        let mut views = match self.introspector.views(database).await {
            Ok(views) => views,
            Err(e) => {
                let warning = format!("Failed to collect views: {}", e);
                tracing::warn!("{}", warning);
                warnings.push(warning);
                Vec::new()
            }
        };
        views.sort_by(|a, b| (&a.schema, &a.name).cmp(&(&b.schema, &b.name)));
        for view in &mut views {
            view.columns.sort_by_key(|c| c.ordinal_position);
        }

        let enum_types = match self.introspector.enum_types(database).await {
            Ok(enums) => enums,
            Err(e) => {
                let warning = format!("Failed to collect enum types: {}", e);
                tracing::warn!("{}", warning);
                warnings.push(warning);
                Vec::new()
            }
        };

        let mut schema = DatabaseSchema::new(database, tables);
        schema.views = views;
        schema.enum_types = enum_types;
        schema.warnings = warnings;

        tracing::info!(
            "Schema for '{}' loaded in {:.2}s - {} tables, {} columns, {} views, {} enum types",
            database,
            start_time.elapsed().as_secs_f64(),
            schema.tables.len(),
            schema.column_count(),
            schema.views.len(),
            schema.enum_types.len()
        );
        Ok(schema)
    }

    async fn fill_table(
        &self,
        database: &str,
        table: &mut TableInfo,
        warnings: &mut Vec<String>,
    ) -> Result<()> {
        let mut columns = self.introspector.columns(database, table).await?;
        columns.sort_by_key(|c| c.ordinal_position);

        let primary_key = match self.introspector.primary_key(database, table).await {
            Ok(pk) => pk,
            Err(e) => {
                let warning = format!(
                    "Failed to collect primary key for '{}': {}",
                    table.qualified_name(),
                    e
                );
                tracing::warn!("{}", warning);
                warnings.push(warning);
                Vec::new()
            }
        };
        for column in &mut columns {
            column.is_primary_key = primary_key.iter().any(|pk| pk == &column.name);
        }

        table.foreign_keys = match self.introspector.foreign_keys(database, table).await {
            Ok(fks) => fks,
            Err(e) => {
                let warning = format!(
                    "Failed to collect foreign keys for '{}': {}",
                    table.qualified_name(),
                    e
                );
                tracing::warn!("{}", warning);
                warnings.push(warning);
                Vec::new()
            }
        };

        table.indexes = match self.introspector.indexes(database, table).await {
            Ok(indexes) => indexes,
            Err(e) => {
                let warning = format!(
                    "Failed to collect indexes for '{}': {}",
                    table.qualified_name(),
                    e
                );
                tracing::warn!("{}", warning);
                warnings.push(warning);
                Vec::new()
            }
        };

        table.columns = columns;
        table.primary_key = primary_key;
        Ok(())
    }
}

/// Handle to a running refresh task.
#[derive(Debug)]
pub struct RefreshHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl RefreshHandle {
    /// Stops the task and waits for it to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for RefreshHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests;
