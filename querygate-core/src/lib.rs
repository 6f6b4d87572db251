//! Core library for QueryGate, a natural-language to SQL gateway.
//!
//! This crate holds everything between a user's question and a database
//! result: the SQL security validator, the schema cache, the resilience kit
//! and the query orchestrator that ties them to external collaborators
//! (SQL generator, executor, result validator, schema introspector).
//!
//! # Security Guarantees
//! - Generated SQL is parsed and checked against a [`SecurityPolicy`] before
//!   it reaches a database
//! - Only single read-only statements are ever executed
//! - Database URLs are redacted in all logs and errors
//! - Internal faults never leak to callers; they surface as a generic
//!   [`ErrorDescriptor`]
//!
//! # Architecture
//! - [`policy`]: pure, synchronous SQL validation
//! - [`schema`]: concurrently readable schema snapshots with refresh
//! - [`resilience`]: circuit breaker, rate limiter and retry policy
//! - [`orchestrator`]: the query operation
//! - [`metrics`]: outcome counters and latencies for the query operation
//! - [`adapters`]: collaborator traits and the PostgreSQL implementation

pub mod adapters;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod policy;
pub mod query;
pub mod resilience;
pub mod schema;

// Re-export commonly used types
pub use adapters::{
    ExecutionOutput, GeneratedSql, ResultAssessment, ResultValidator, SchemaIntrospector,
    SqlExecutor, SqlGenerator,
};
pub use config::{AppConfig, SecurityPolicy};
pub use error::{ErrorDescriptor, ErrorKind, QueryGateError, Result};
pub use logging::{LogFormat, init_logging};
pub use metrics::{MetricsSnapshot, QueryMetrics};
pub use models::{ColumnInfo, DatabaseSchema, TableInfo};
pub use orchestrator::QueryOrchestrator;
pub use policy::{SqlValidator, ValidationResult};
pub use query::{QueryRequest, QueryResponse, QueryResult, ReturnMode};
pub use resilience::Resilience;
pub use schema::SchemaCache;

#[cfg(feature = "postgresql")]
pub use adapters::postgres::PostgresAdapter;
