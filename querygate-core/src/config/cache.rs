//! Schema cache settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::QueryGateError;

/// Schema cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Background refresh interval; no timer runs when unset
    pub refresh_interval_secs: Option<u64>,
    /// Tables included in the generator context
    pub context_max_tables: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: None,
            context_max_tables: 50,
        }
    }
}

impl CacheConfig {
    /// Refresh interval as a duration
    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_interval_secs.map(Duration::from_secs)
    }

    /// Validates the settings.
    ///
    /// # Errors
    /// Returns a configuration error for zero values.
    pub fn validate(&self) -> crate::Result<()> {
        if self.refresh_interval_secs == Some(0) {
            return Err(QueryGateError::configuration(
                "cache.refresh_interval_secs must be greater than 0 when set",
            ));
        }

        if self.context_max_tables == 0 {
            return Err(QueryGateError::configuration(
                "cache.context_max_tables must be greater than 0",
            ));
        }

        Ok(())
    }
}
