use super::*;
use crate::models::{ColumnInfo, EnumTypeInfo, ForeignKeyInfo, IndexInfo, ViewInfo};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Introspector serving one `users` table per database, with switches for
/// failure injection.
#[derive(Default)]
struct StubIntrospector {
    fail_tables: AtomicBool,
    fail_views: AtomicBool,
    unknown: Vec<&'static str>,
    loads: AtomicUsize,
}

impl StubIntrospector {
    fn unavailable(names: Vec<&'static str>) -> Self {
        Self {
            unknown: names,
            ..Default::default()
        }
    }
}

#[async_trait]
impl SchemaIntrospector for StubIntrospector {
    async fn list_tables(&self, database: &str) -> Result<Vec<TableInfo>> {
        if self.fail_tables.load(Ordering::SeqCst) || self.unknown.iter().any(|n| *n == database) {
            return Err(QueryGateError::database(format!(
                "connection to '{}' refused",
                database
            )));
        }
        let generation = self.loads.fetch_add(1, Ordering::SeqCst) as u64;
        let mut users = TableInfo::new("public", "users");
        users.row_count_estimate = Some(generation);
        Ok(vec![users, TableInfo::new("public", "accounts")])
    }

    async fn columns(&self, _database: &str, table: &TableInfo) -> Result<Vec<ColumnInfo>> {
        // Deliberately out of ordinal order
        Ok(vec![
            ColumnInfo::new("created_at", "timestamptz", 3),
            ColumnInfo::new("id", "integer", 1),
            ColumnInfo::new(format!("{}_name", table.name), "text", 2),
        ])
    }

    async fn primary_key(&self, _database: &str, _table: &TableInfo) -> Result<Vec<String>> {
        Ok(vec!["id".to_string()])
    }

    async fn foreign_keys(&self, _database: &str, table: &TableInfo) -> Result<Vec<ForeignKeyInfo>> {
        if table.name == "accounts" {
            return Err(QueryGateError::database("permission denied for pg_constraint"));
        }
        Ok(Vec::new())
    }

    async fn indexes(&self, _database: &str, _table: &TableInfo) -> Result<Vec<IndexInfo>> {
        Ok(Vec::new())
    }

    async fn views(&self, _database: &str) -> Result<Vec<ViewInfo>> {
        if self.fail_views.load(Ordering::SeqCst) {
            return Err(QueryGateError::database("views unavailable"));
        }
        Ok(Vec::new())
    }

    async fn enum_types(&self, _database: &str) -> Result<Vec<EnumTypeInfo>> {
        Ok(vec![EnumTypeInfo {
            schema: "public".to_string(),
            name: "status".to_string(),
            values: vec!["active".to_string()],
        }])
    }
}

fn cache_with(stub: Arc<StubIntrospector>) -> Arc<SchemaCache> {
    Arc::new(SchemaCache::new(stub))
}

#[tokio::test]
async fn test_load_assembles_snapshot() {
    let stub = Arc::new(StubIntrospector::default());
    let cache = cache_with(stub);

    assert!(cache.get("sales").is_none());
    let schema = cache.load("sales").await.unwrap();

    assert_eq!(schema.name, "sales");
    // Sorted by schema and name
    assert_eq!(schema.tables[0].name, "accounts");
    let users = schema.table("users").unwrap();
    let ordinals: Vec<u32> = users.columns.iter().map(|c| c.ordinal_position).collect();
    assert_eq!(ordinals, vec![1, 2, 3]);
    assert!(users.column("id").unwrap().is_primary_key);
    assert!(!users.column("created_at").unwrap().is_primary_key);
    assert_eq!(users.primary_key, vec!["id"]);
    assert_eq!(schema.enum_types.len(), 1);

    // The accounts foreign key failure is a warning, not a load failure
    assert_eq!(schema.warnings.len(), 1);
    assert!(schema.warnings[0].contains("public.accounts"));

    assert!(Arc::ptr_eq(&schema, &cache.get("sales").unwrap()));
    assert_eq!(cache.databases(), vec!["sales"]);
}

#[tokio::test]
async fn test_refresh_failure_serves_previous_snapshot() {
    let stub = Arc::new(StubIntrospector::default());
    let cache = cache_with(stub.clone());

    let first = cache.load("sales").await.unwrap();
    stub.fail_tables.store(true, Ordering::SeqCst);

    assert!(cache.refresh("sales").await.is_err());
    let current = cache.get("sales").unwrap();
    assert!(Arc::ptr_eq(&first, &current));

    stub.fail_tables.store(false, Ordering::SeqCst);
    let refreshed = cache.refresh("sales").await.unwrap();
    assert!(!Arc::ptr_eq(&first, &refreshed));
    assert_eq!(refreshed.table("users").unwrap().row_count_estimate, Some(1));
}

#[tokio::test]
async fn test_readers_keep_their_snapshot_across_refresh() {
    let stub = Arc::new(StubIntrospector::default());
    let cache = cache_with(stub);

    let held = cache.load("sales").await.unwrap();
    cache.refresh("sales").await.unwrap();

    assert_eq!(held.table("users").unwrap().row_count_estimate, Some(0));
    assert_eq!(
        cache.get_table("sales", "public.users").unwrap().row_count_estimate,
        Some(1)
    );
}

#[tokio::test]
async fn test_optional_metadata_failures_become_warnings() {
    let stub = Arc::new(StubIntrospector::default());
    stub.fail_views.store(true, Ordering::SeqCst);
    let cache = cache_with(stub);

    let schema = cache.load("sales").await.unwrap();
    assert!(schema.views.is_empty());
    assert!(schema.warnings.iter().any(|w| w.contains("views")));
}

#[tokio::test]
async fn test_load_all_degrades_gracefully() {
    let stub = Arc::new(StubIntrospector::unavailable(vec!["broken"]));
    let cache = cache_with(stub);

    let names = vec!["sales".to_string(), "broken".to_string(), "hr".to_string()];
    let report = cache.load_all(&names).await;

    assert!(!report.is_complete());
    assert_eq!(report.loaded, vec!["hr", "sales"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "broken");
    assert!(cache.get("broken").is_none());
    assert!(cache.get("sales").is_some());
}

#[tokio::test]
async fn test_invalidate_and_insert() {
    let stub = Arc::new(StubIntrospector::default());
    let cache = cache_with(stub);

    cache.insert(DatabaseSchema::new("manual", Vec::new()));
    assert_eq!(cache.databases(), vec!["manual"]);
    assert!(cache.invalidate("manual"));
    assert!(!cache.invalidate("manual"));
    assert!(cache.get("manual").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_refresh_task_runs_on_interval_and_stops() {
    let stub = Arc::new(StubIntrospector::default());
    let cache = cache_with(stub.clone());
    cache.load("sales").await.unwrap();

    let handle = cache.start_refresh_task(vec!["sales".to_string()], Duration::from_secs(30));

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(stub.loads.load(Ordering::SeqCst), 2);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(stub.loads.load(Ordering::SeqCst), 3);

    handle.shutdown().await;
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(stub.loads.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_configured_refresh_follows_cache_settings() {
    let stub = Arc::new(StubIntrospector::default());
    let cache = cache_with(stub.clone());
    cache.load("sales").await.unwrap();

    let mut config = AppConfig::default();
    config.databases = vec![crate::config::DatabaseConfig::new(
        "sales",
        "postgres://reader@localhost/sales",
    )];
    assert!(cache.start_configured_refresh(&config).is_none());

    config.cache.refresh_interval_secs = Some(10);
    let handle = cache.start_configured_refresh(&config).unwrap();
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(stub.loads.load(Ordering::SeqCst), 2);
    handle.shutdown().await;
}
