//! QueryGate command-line front end.
//!
//! Exposes the parts of the gateway that need no language model: checking
//! SQL against the security policy, loading and rendering schema snapshots,
//! and reporting which configured databases can be served.
//!
//! # Security Guarantees
//! - Database URLs are redacted in every log line and error
//! - Introspection runs over read-only sessions
//! - `validate` never connects to a database

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use querygate_core::{
    AppConfig, LogFormat, SqlValidator, init_logging,
    config::CONFIG_PATH_ENV,
    schema::{SchemaCache, render_context},
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "querygate")]
#[command(about = "Natural-language to SQL gateway tooling")]
#[command(version)]
#[command(long_about = "
QueryGate - Guarded natural-language to SQL gateway

This tool exposes the offline parts of the gateway:
- Validate SQL against the configured security policy
- Load and render database schema snapshots
- Check which configured databases can be served

SECURITY FEATURES:
- Only single read-only SELECT statements pass validation
- Introspection and execution use read-only sessions
- Connection strings are redacted in all output

EXAMPLES:
  querygate validate \"SELECT count(*) FROM users\"
  echo \"DELETE FROM users\" | querygate validate
  querygate --config gateway.toml schema sales --json
  QUERYGATE_DATABASE_URL=postgres://reader@localhost/app querygate databases
")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Check SQL against the security policy
    Validate(ValidateArgs),
    /// Load one database schema and print it
    Schema(SchemaArgs),
    /// Load every configured database and report availability
    Databases,
}

#[derive(Args)]
pub struct ValidateArgs {
    /// SQL to validate; read from stdin when omitted
    #[arg(help = "SQL statement to validate (reads stdin when omitted)")]
    pub sql: Option<String>,
}

#[derive(Args)]
pub struct SchemaArgs {
    /// Configured database name
    #[arg(help = "Name of a configured database")]
    pub database: String,

    /// Print the full snapshot as JSON instead of the context projection
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv, -vvv)"
    )]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, global = true, help = "Suppress all output except errors")]
    pub quiet: bool,

    /// Log format
    #[arg(long, global = true, default_value = "text", help = "Log format (text or json)")]
    pub log_format: LogFormat,

    /// Configuration file
    #[arg(
        short,
        long,
        global = true,
        env = CONFIG_PATH_ENV,
        help = "Path to the TOML configuration file"
    )]
    pub config: Option<PathBuf>,
}

/// Exit code for SQL rejected by the policy
const EXIT_REJECTED: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.global.verbose, cli.global.quiet, cli.global.log_format) {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    match run(&cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> anyhow::Result<ExitCode> {
    let config = AppConfig::load(cli.global.config.as_deref())?;

    match &cli.command {
        Command::Validate(args) => validate_sql(&config, args.sql.as_deref()).await,
        Command::Schema(args) => show_schema(&config, &args.database, args.json).await,
        Command::Databases => check_databases(&config).await,
    }
}

/// Validates SQL and prints the verdict as JSON
async fn validate_sql(config: &AppConfig, sql: Option<&str>) -> anyhow::Result<ExitCode> {
    let sql = match sql {
        Some(sql) => sql.to_string(),
        None => {
            let mut buffer = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buffer)
                .await
                .context("Failed to read SQL from stdin")?;
            buffer
        }
    };

    let verdict = SqlValidator::for_config(config).validate(&sql);
    println!("{}", serde_json::to_string_pretty(&verdict)?);

    if verdict.valid {
        info!("✓ SQL accepted");
        Ok(ExitCode::SUCCESS)
    } else {
        warn!(
            "SQL rejected: {}",
            verdict.reason.as_deref().unwrap_or("no reason given")
        );
        Ok(ExitCode::from(EXIT_REJECTED))
    }
}

#[cfg(feature = "postgresql")]
fn connect(config: &AppConfig) -> anyhow::Result<Arc<querygate_core::PostgresAdapter>> {
    if config.databases.is_empty() {
        bail!(
            "No databases are configured; pass --config or set QUERYGATE_DATABASE_URL"
        );
    }
    for database in &config.databases {
        info!("Database '{}': {}", database.name, database.redacted_url());
    }
    Ok(Arc::new(querygate_core::PostgresAdapter::from_config(
        &config.databases,
    )?))
}

/// Loads one schema and prints the context projection or the full snapshot
#[cfg(feature = "postgresql")]
async fn show_schema(config: &AppConfig, database: &str, json: bool) -> anyhow::Result<ExitCode> {
    if config.database(database).is_none() {
        bail!("Database '{}' is not configured", database);
    }

    let adapter = connect(config)?;
    let cache = SchemaCache::new(adapter.clone());
    let loaded = cache.load(database).await;
    adapter.close().await;
    let schema = loaded?;

    info!(
        "✓ Loaded {} tables, {} views from '{}'",
        schema.tables.len(),
        schema.views.len(),
        database
    );
    for warning in &schema.warnings {
        warn!("{}", warning);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(schema.as_ref())?);
    } else {
        print!("{}", render_context(&schema, config.cache.context_max_tables));
    }
    Ok(ExitCode::SUCCESS)
}

/// Loads every configured database and prints one line per database
#[cfg(feature = "postgresql")]
async fn check_databases(config: &AppConfig) -> anyhow::Result<ExitCode> {
    let adapter = connect(config)?;
    let cache = SchemaCache::new(adapter.clone());
    let report = cache.load_all(&config.database_names()).await;
    adapter.close().await;

    for name in &report.loaded {
        if let Some(schema) = cache.get(name) {
            println!(
                "{}: available ({} tables, {} views, {} columns)",
                name,
                schema.tables.len(),
                schema.views.len(),
                schema.column_count()
            );
        }
    }
    for (name, error) in &report.failed {
        let url = config
            .database(name)
            .map(|db| db.redacted_url())
            .unwrap_or_default();
        println!("{}: unavailable ({}) [{}]", name, error.message(), url);
    }

    if report.is_complete() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

#[cfg(not(feature = "postgresql"))]
async fn show_schema(_config: &AppConfig, _database: &str, _json: bool) -> anyhow::Result<ExitCode> {
    bail!("Schema introspection not available. Compile with --features postgresql")
}

#[cfg(not(feature = "postgresql"))]
async fn check_databases(_config: &AppConfig) -> anyhow::Result<ExitCode> {
    bail!("Schema introspection not available. Compile with --features postgresql")
}
