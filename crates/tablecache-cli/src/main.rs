//! tablecache command-line tool.
//!
//! Provides the `tablecache` binary:
//! - `sql` prints the statements generated for the built-in `kv` table in
//!   any supported dialect
//! - `put`, `get` and `list` work on a SQLite `kv` table through a record
//!   cache
//! - `serve` runs the background refresh loop until Ctrl-C; a second Ctrl-C
//!   abandons the final flush
//!
//! Reads configuration from environment variables:
//! - `TABLECACHE_DB_PATH`: SQLite database file path (default: "tablecache.db")
//! - `TABLECACHE_DIALECT`: dialect for `sql` (default: "postgres")
//! - `TABLECACHE_REFRESH_SECS` / `TABLECACHE_EXPIRY_SECS`: cache timing
//! - `RUST_LOG`: log filter (default: "info")

mod kv;
mod sql;

use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use tablecache_core::{Dialect, StatementCache};
use tablecache_service::{CacheConfig, CacheService, RecordCache, ServiceError};
use tablecache_storage::{CancellationToken, SqliteTable};

use kv::{KvRecord, KV_SCHEMA};
use sql::SqlOp;

type KvCache = RecordCache<KvRecord, SqliteTable<KvRecord>>;

/// Statement and record cache tools.
#[derive(Parser)]
#[command(name = "tablecache", about = "Statement and record cache tools")]
struct Cli {
    /// Path to the SQLite database file.
    #[arg(long, global = true, env = "TABLECACHE_DB_PATH", default_value = "tablecache.db")]
    db: String,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Print generated SQL for the `kv` table.
    Sql {
        /// Dialect: postgres, sqlserver or sqlite.
        #[arg(short, long, env = "TABLECACHE_DIALECT", default_value = "postgres")]
        dialect: String,

        /// Print only this statement (default: all).
        #[arg(short, long, value_enum)]
        op: Option<SqlOp>,
    },

    /// Store a value under a key.
    Put {
        key: String,
        value: String,

        /// Owning user id.
        #[arg(long)]
        owner: Option<i64>,
    },

    /// Print the record stored under a key.
    Get { key: String },

    /// Print every record.
    List,

    /// Keep the cache in sync with the database until Ctrl-C.
    Serve,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Sql { dialect, op } => run_sql(&dialect, op),
        Commands::Put { key, value, owner } => report(run_put(&cli.db, &key, &value, owner).await),
        Commands::Get { key } => report(run_get(&cli.db, &key).await),
        Commands::List => report(run_list(&cli.db).await),
        Commands::Serve => report(run_serve(&cli.db).await),
    };
    process::exit(exit_code);
}

/// Maps a command outcome to an exit code: 0 = success, 1 = not found,
/// 2 = error.
fn report(result: Result<i32, ServiceError>) -> i32 {
    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            2
        }
    }
}

/// Execute the sql subcommand.
fn run_sql(dialect: &str, op: Option<SqlOp>) -> i32 {
    let dialect: Dialect = match dialect.parse() {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 2;
        }
    };
    let statements = match StatementCache::<KvRecord>::new(dialect) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 2;
        }
    };

    let ops: Vec<SqlOp> = match op {
        Some(op) => vec![op],
        None => SqlOp::value_variants().to_vec(),
    };

    let mut exit_code = 0;
    for op in ops {
        let name = op
            .to_possible_value()
            .map(|v| v.get_name().to_string())
            .unwrap_or_else(|| format!("{:?}", op));
        match sql::render(&statements, op) {
            Ok(cmd) => println!("-- {}\n{}\n", name, sql::format_command(&cmd)),
            Err(e) => {
                eprintln!("-- {}: {}", name, e);
                exit_code = 2;
            }
        }
    }
    exit_code
}

fn open_cache(db_path: &str) -> Result<KvCache, ServiceError> {
    let table = SqliteTable::<KvRecord>::open(db_path, &[KV_SCHEMA])?;
    RecordCache::new(Arc::new(table), CacheConfig::from_env()?)
}

fn print_record(record: &KvRecord) -> Result<(), ServiceError> {
    let line = serde_json::to_string(record).map_err(tablecache_storage::StorageError::from)?;
    println!("{}", line);
    Ok(())
}

/// Execute the put subcommand: stage the record and flush it.
async fn run_put(
    db_path: &str,
    key: &str,
    value: &str,
    owner: Option<i64>,
) -> Result<i32, ServiceError> {
    let cache = open_cache(db_path)?;
    let cancel = CancellationToken::new();

    let mut record = cache
        .get_or_fetch(&key.to_string(), &cancel)
        .await?
        .unwrap_or_else(|| KvRecord::new(key, value));
    record.value = value.to_string();
    if owner.is_some() {
        record.owner_id = owner;
    }

    cache.stage(&record)?;
    cache.flush(&cancel).await?;

    match cache.get(&record.key)? {
        Some(stored) => print_record(&stored)?,
        None => print_record(&record)?,
    }
    Ok(0)
}

/// Execute the get subcommand.
async fn run_get(db_path: &str, key: &str) -> Result<i32, ServiceError> {
    let cache = open_cache(db_path)?;
    match cache.get_or_fetch(&key.to_string(), &CancellationToken::new()).await? {
        Some(record) => {
            print_record(&record)?;
            Ok(0)
        }
        None => {
            eprintln!("not found: {}", key);
            Ok(1)
        }
    }
}

/// Execute the list subcommand.
async fn run_list(db_path: &str) -> Result<i32, ServiceError> {
    let cache = open_cache(db_path)?;
    cache.refresh(&CancellationToken::new()).await?;
    for record in cache.values()? {
        print_record(&record)?;
    }
    Ok(0)
}

/// Execute the serve subcommand.
async fn run_serve(db_path: &str) -> Result<i32, ServiceError> {
    let cache = Arc::new(open_cache(db_path)?);
    let service = CacheService::new(Arc::clone(&cache));
    let shutdown = CancellationToken::new();

    service.start(&shutdown)?;
    tracing::info!(
        db = db_path,
        interval_secs = cache.config().refresh_interval.as_secs(),
        "tablecache serving; press Ctrl-C to stop"
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for Ctrl-C");
    }

    tracing::info!("shutting down; press Ctrl-C again to skip the final flush");
    let abandon = CancellationToken::new();
    {
        let abandon = abandon.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                abandon.cancel();
            }
        });
    }
    service.stop(&abandon).await?;
    tracing::info!(records = cache.len(), "stopped");
    Ok(0)
}
