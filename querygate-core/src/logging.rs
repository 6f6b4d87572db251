//! Shared logging setup for the QueryGate binary and embedding services.
//!
//! Provides consistent structured logging configuration with optional
//! JSON output and `RUST_LOG` overrides.

use crate::Result;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Maximum number of characters of a user question written to logs.
pub const QUESTION_LOG_LIMIT: usize = 100;

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single-line output
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = crate::error::QueryGateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(crate::error::QueryGateError::configuration(format!(
                "Unknown log format '{}': expected 'text' or 'json'",
                other
            ))),
        }
    }
}

/// Maps CLI verbosity flags to a maximum log level.
pub const fn level_for(verbose: u8, quiet: bool) -> tracing::Level {
    match (quiet, verbose) {
        (true, _) => tracing::Level::ERROR,
        (false, 0) => tracing::Level::INFO,
        (false, 1) => tracing::Level::DEBUG,
        (false, _) => tracing::Level::TRACE,
    }
}

/// Initializes structured logging based on verbosity level.
///
/// `RUST_LOG`, when set, takes precedence over the verbosity flags.
///
/// # Arguments
/// * `verbose` - Verbosity level (0=INFO, 1=DEBUG, 2+=TRACE)
/// * `quiet` - If true, only show ERROR level logs
/// * `format` - Text or JSON event output
///
/// # Example
/// ```rust,no_run
/// use querygate_core::logging::{LogFormat, init_logging};
///
/// init_logging(1, false, LogFormat::Text).expect("Failed to initialize logging");
/// ```
pub fn init_logging(verbose: u8, quiet: bool, format: LogFormat) -> Result<()> {
    let level = level_for(verbose, quiet);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr);

    let result = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
    };

    result.map_err(|e| {
        crate::error::QueryGateError::configuration(format!(
            "Failed to initialize logging: {}",
            e
        ))
    })
}

/// Truncates a question for log output.
pub fn truncate_for_log(text: &str) -> String {
    if text.chars().count() <= QUESTION_LOG_LIMIT {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(QUESTION_LOG_LIMIT).collect();
    truncated.push_str("...");
    truncated
}
