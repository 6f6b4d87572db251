//! Configuration types for the gateway.
//!
//! This module contains all configuration structures:
//! - `DatabaseConfig`: One target database and its pool settings
//! - `SecurityPolicy`: Rules enforced by the SQL validator
//! - `ResilienceConfig`: Retry, circuit breaker and rate limiting settings
//! - `ValidationConfig`: Request and result validation settings
//! - `CacheConfig`: Schema cache settings
//!
//! Configuration is read from a TOML file and may be overridden by
//! environment variables. Every struct is immutable once loaded.

mod cache;
mod database;
mod resilience;
mod security;
mod validation;

pub use cache::CacheConfig;
pub use database::DatabaseConfig;
pub use resilience::ResilienceConfig;
pub use security::SecurityPolicy;
pub use validation::{LowConfidenceMode, ValidationConfig};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use crate::Result;
use crate::error::QueryGateError;

/// Environment variable holding the path of the configuration file
pub const CONFIG_PATH_ENV: &str = "QUERYGATE_CONFIG";
/// Environment variable holding a database URL override
pub const DATABASE_URL_ENV: &str = "QUERYGATE_DATABASE_URL";
/// Environment variable naming the database the URL override applies to
pub const DATABASE_NAME_ENV: &str = "QUERYGATE_DATABASE_NAME";

const DEFAULT_DATABASE_NAME: &str = "default";

/// Schema PostgreSQL resolves unqualified names to by default
const DEFAULT_SCHEMA: &str = "public";

/// Complete gateway configuration.
///
/// # Example
/// ```rust
/// use querygate_core::config::AppConfig;
///
/// let config: AppConfig = toml::from_str(r#"
///     [[databases]]
///     name = "sales"
///     url = "postgres://reader@localhost/sales"
///
///     [security]
///     blocked_tables = ["audit_*"]
/// "#).unwrap();
///
/// assert!(config.validate().is_ok());
/// assert_eq!(config.database_names(), vec!["sales".to_string()]);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Target databases
    pub databases: Vec<DatabaseConfig>,
    /// SQL security policy
    pub security: SecurityPolicy,
    /// Resilience settings
    pub resilience: ResilienceConfig,
    /// Request and result validation settings
    pub validation: ValidationConfig,
    /// Schema cache settings
    pub cache: CacheConfig,
}

impl AppConfig {
    /// Loads configuration from an optional TOML file, then applies
    /// environment overrides and validates the result.
    ///
    /// # Errors
    /// Returns a configuration error if the file cannot be read or parsed,
    /// or if the merged configuration is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                tracing::debug!("Loading configuration from {}", path.display());
                let text = std::fs::read_to_string(path).map_err(|e| {
                    QueryGateError::configuration(format!(
                        "Failed to read configuration file '{}': {}",
                        path.display(),
                        e
                    ))
                })?;
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parses configuration from TOML text without validating it.
    ///
    /// # Errors
    /// Returns a configuration error if the text is not valid TOML for this
    /// structure.
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Applies `QUERYGATE_DATABASE_URL` / `QUERYGATE_DATABASE_NAME`.
    pub fn apply_env_overrides(&mut self) {
        let Ok(url) = std::env::var(DATABASE_URL_ENV) else {
            return;
        };
        if url.trim().is_empty() {
            return;
        }
        let name = std::env::var(DATABASE_NAME_ENV)
            .ok()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DATABASE_NAME.to_string());

        let replacement = match self.databases.iter().position(|db| db.name == name) {
            Some(index) => {
                let existing = self.databases.remove(index);
                DatabaseConfig::new(name, url)
                    .with_max_connections(existing.max_connections)
                    .with_connect_timeout_secs(existing.connect_timeout_secs)
                    .with_schemas(existing.schemas.clone())
            }
            None => DatabaseConfig::new(name, url),
        };

        tracing::debug!(
            "Database '{}' overridden from environment: {}",
            replacement.name,
            replacement.redacted_url()
        );
        self.databases.push(replacement);
    }

    /// Names of all configured databases, in configuration order.
    pub fn database_names(&self) -> Vec<String> {
        self.databases.iter().map(|db| db.name.clone()).collect()
    }

    /// Every schema that unqualified table names may resolve to, across all
    /// configured databases. `public` when no database is configured.
    pub fn search_schemas(&self) -> Vec<String> {
        let schemas: BTreeSet<String> = self
            .databases
            .iter()
            .flat_map(|db| db.schemas.iter())
            .map(|schema| schema.trim().to_lowercase())
            .collect();
        if schemas.is_empty() {
            vec![DEFAULT_SCHEMA.to_string()]
        } else {
            schemas.into_iter().collect()
        }
    }

    /// Looks up a configured database by name.
    pub fn database(&self, name: &str) -> Option<&DatabaseConfig> {
        self.databases.iter().find(|db| db.name == name)
    }

    /// Validates every section.
    ///
    /// # Errors
    /// Returns the first configuration error found.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for database in &self.databases {
            database.validate()?;
            if !seen.insert(database.name.as_str()) {
                return Err(QueryGateError::configuration(format!(
                    "duplicate database name '{}'",
                    database.name
                )));
            }
        }

        self.security.validate()?;
        self.resilience.validate()?;
        self.validation.validate()?;
        self.cache.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
        [[databases]]
        name = "sales"
        url = "postgres://reader:pw@localhost/sales"
        schemas = ["public", "reporting"]

        [[databases]]
        name = "hr"
        url = "postgres://reader:pw@localhost/hr"

        [security]
        blocked_tables = ["audit_*"]
        max_join_tables = 3

        [resilience]
        max_retries = 2

        [validation]
        low_confidence_mode = "fail"

        [cache]
        refresh_interval_secs = 300
    "#;

    #[test]
    fn test_parse_full_config() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.databases.len(), 2);
        assert_eq!(config.databases[0].schemas.len(), 2);
        assert_eq!(config.security.max_join_tables, 3);
        assert_eq!(config.resilience.max_attempts(), 3);
        assert_eq!(config.validation.low_confidence_mode, LowConfidenceMode::Fail);
        assert_eq!(config.cache.refresh_interval_secs, Some(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_search_schemas_union_configured_schemas() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.search_schemas(), vec!["public", "reporting"]);
        assert_eq!(AppConfig::default().search_schemas(), vec!["public"]);
    }

    #[test]
    fn test_duplicate_database_names_rejected() {
        let mut config = AppConfig::from_toml(SAMPLE).unwrap();
        config.databases[1].name = "sales".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.message().contains("duplicate"));
    }

    #[test]
    fn test_invalid_toml_is_configuration_error() {
        let err = AppConfig::from_toml("databases = 12").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = temp_env::with_vars_unset([DATABASE_URL_ENV, DATABASE_NAME_ENV], || {
            AppConfig::load(Some(file.path()))
        })
        .unwrap();
        assert_eq!(config.database_names(), vec!["sales", "hr"]);
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = AppConfig::load(Some(Path::new("/definitely/not/here.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn test_env_override_adds_default_database() {
        let config = temp_env::with_vars(
            [
                (DATABASE_URL_ENV, Some("postgres://env@localhost/app")),
                (DATABASE_NAME_ENV, None),
            ],
            || AppConfig::load(None),
        )
        .unwrap();

        assert_eq!(config.database_names(), vec!["default"]);
        assert_eq!(
            config.database("default").map(DatabaseConfig::url),
            Some("postgres://env@localhost/app")
        );
    }

    #[test]
    fn test_env_override_replaces_named_database() {
        let mut config = AppConfig::from_toml(SAMPLE).unwrap();
        temp_env::with_vars(
            [
                (DATABASE_URL_ENV, Some("postgres://env@otherhost/hr")),
                (DATABASE_NAME_ENV, Some("hr")),
            ],
            || config.apply_env_overrides(),
        );

        assert_eq!(config.databases.len(), 2);
        assert_eq!(
            config.database("hr").map(DatabaseConfig::url),
            Some("postgres://env@otherhost/hr")
        );
    }
}
