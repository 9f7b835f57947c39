use clap::{Parser, Subcommand};

use std::path::PathBuf;

use super::config::{StorageBackend, StoreMode};
use super::constants::{
    ENV_AGGREGATION, ENV_COLLECTION_PREFIX, ENV_CONFIG, ENV_DATABASE_BACKEND, ENV_DATABASE_PATH,
    ENV_DB_PREFIX, ENV_DB_TIMEOUT_SECS, ENV_DEFAULT_SERVICE, ENV_DEFAULT_SERVICE_PATH, ENV_FILTER_OUT_EMPTY,
    ENV_HOST,
    ENV_NAMESPACE_LIMIT, ENV_PORT, ENV_PROOF_OF_LIFE_INTERVAL, ENV_SHOULD_HASH, ENV_SHOULD_STORE,
    ENV_TRUNCATION_CHECK_EVERY, ENV_TRUNCATION_EXPIRE_AFTER_SECONDS, ENV_TRUNCATION_INTERVAL_SECS,
    ENV_TRUNCATION_MAX, ENV_TRUNCATION_SIZE,
};

#[derive(Parser)]
#[command(name = "comet")]
#[command(
    version,
    about = "Short-term history for context attribute events",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Server host address
    #[arg(long, short = 'H', global = true, env = ENV_HOST)]
    pub host: Option<String>,

    /// Server port
    #[arg(long, short = 'p', global = true, env = ENV_PORT)]
    pub port: Option<u16>,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// Active resolutions, comma separated (second,minute,hour,day,month)
    #[arg(long, global = true, env = ENV_AGGREGATION)]
    pub aggregation: Option<String>,

    /// Drop aggregated history entries with no value for the requested method
    #[arg(long, global = true, env = ENV_FILTER_OUT_EMPTY)]
    pub filter_out_empty: Option<bool>,

    // Database options
    /// Storage backend (memory or sqlite)
    #[arg(long, global = true, env = ENV_DATABASE_BACKEND, value_parser = parse_storage_backend)]
    pub database_backend: Option<StorageBackend>,

    /// SQLite database file (sqlite backend)
    #[arg(long, global = true, env = ENV_DATABASE_PATH)]
    pub database_path: Option<PathBuf>,

    /// What to persist: only-raw, only-aggregated or both
    #[arg(long, global = true, env = ENV_SHOULD_STORE, value_parser = parse_store_mode)]
    pub should_store: Option<StoreMode>,

    /// Replace over-long collection names by their SHA-256 hash
    #[arg(long, global = true, env = ENV_SHOULD_HASH)]
    pub should_hash: Option<bool>,

    /// Database name prefix
    #[arg(long, global = true, env = ENV_DB_PREFIX)]
    pub db_prefix: Option<String>,

    /// Collection name prefix
    #[arg(long, global = true, env = ENV_COLLECTION_PREFIX)]
    pub collection_prefix: Option<String>,

    /// Namespace (database.collection) byte limit
    #[arg(long, global = true, env = ENV_NAMESPACE_LIMIT)]
    pub namespace_limit: Option<usize>,

    /// Service used when a request carries none
    #[arg(long, global = true, env = ENV_DEFAULT_SERVICE)]
    pub default_service: Option<String>,

    /// Service path used when a request carries none
    #[arg(long, global = true, env = ENV_DEFAULT_SERVICE_PATH)]
    pub default_service_path: Option<String>,

    /// Timeout for a single storage call in seconds
    #[arg(long, global = true, env = ENV_DB_TIMEOUT_SECS)]
    pub db_timeout_secs: Option<u64>,

    // Truncation options
    /// Delete records older than this many seconds (0 = disabled)
    #[arg(long, global = true, env = ENV_TRUNCATION_EXPIRE_AFTER_SECONDS)]
    pub truncation_expire_after_seconds: Option<u64>,

    /// Byte bound for raw collections (0 = disabled)
    #[arg(long, global = true, env = ENV_TRUNCATION_SIZE)]
    pub truncation_size: Option<u64>,

    /// Record count bound for raw collections (0 = disabled)
    #[arg(long, global = true, env = ENV_TRUNCATION_MAX)]
    pub truncation_max: Option<u64>,

    /// Seconds between background retention passes
    #[arg(long, global = true, env = ENV_TRUNCATION_INTERVAL_SECS)]
    pub truncation_interval_secs: Option<u64>,

    /// Writes per collection between post-write retention checks (0 = disabled)
    #[arg(long, global = true, env = ENV_TRUNCATION_CHECK_EVERY)]
    pub truncation_check_every: Option<u64>,

    /// Seconds between proof-of-life log lines (0 = disabled)
    #[arg(long, global = true, env = ENV_PROOF_OF_LIFE_INTERVAL)]
    pub proof_of_life_interval: Option<u64>,
}

/// Parse storage backend from CLI/env string
fn parse_storage_backend(s: &str) -> Result<StorageBackend, String> {
    match s.to_lowercase().as_str() {
        "memory" => Ok(StorageBackend::Memory),
        "sqlite" => Ok(StorageBackend::Sqlite),
        _ => Err(format!(
            "Invalid storage backend '{}'. Valid options: memory, sqlite",
            s
        )),
    }
}

/// Parse store mode from CLI/env string
fn parse_store_mode(s: &str) -> Result<StoreMode, String> {
    match s.to_lowercase().as_str() {
        "only-raw" => Ok(StoreMode::OnlyRaw),
        "only-aggregated" => Ok(StoreMode::OnlyAggregated),
        "both" => Ok(StoreMode::Both),
        _ => Err(format!(
            "Invalid store mode '{}'. Valid options: only-raw, only-aggregated, both",
            s
        )),
    }
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Start the server (default command)
    Start,
    /// System maintenance commands
    System {
        #[command(subcommand)]
        command: SystemCommands,
    },
}

#[derive(Subcommand, Clone, Debug)]
pub enum SystemCommands {
    /// Delete local data directory (SQLite database). Requires confirmation.
    Prune {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub config: Option<PathBuf>,
    pub aggregation: Option<String>,
    pub filter_out_empty: Option<bool>,
    pub database_backend: Option<StorageBackend>,
    pub database_path: Option<PathBuf>,
    pub should_store: Option<StoreMode>,
    pub should_hash: Option<bool>,
    pub db_prefix: Option<String>,
    pub collection_prefix: Option<String>,
    pub namespace_limit: Option<usize>,
    pub default_service: Option<String>,
    pub default_service_path: Option<String>,
    pub db_timeout_secs: Option<u64>,
    pub truncation_expire_after_seconds: Option<u64>,
    pub truncation_size: Option<u64>,
    pub truncation_max: Option<u64>,
    pub truncation_interval_secs: Option<u64>,
    pub truncation_check_every: Option<u64>,
    pub proof_of_life_interval: Option<u64>,
}

/// Parse CLI arguments and return config with command
pub fn parse() -> (CliConfig, Option<Commands>) {
    let cli = Cli::parse();
    let config = CliConfig {
        host: cli.host,
        port: cli.port,
        config: cli.config,
        aggregation: cli.aggregation,
        filter_out_empty: cli.filter_out_empty,
        database_backend: cli.database_backend,
        database_path: cli.database_path,
        should_store: cli.should_store,
        should_hash: cli.should_hash,
        db_prefix: cli.db_prefix,
        collection_prefix: cli.collection_prefix,
        namespace_limit: cli.namespace_limit,
        default_service: cli.default_service,
        default_service_path: cli.default_service_path,
        db_timeout_secs: cli.db_timeout_secs,
        truncation_expire_after_seconds: cli.truncation_expire_after_seconds,
        truncation_size: cli.truncation_size,
        truncation_max: cli.truncation_max,
        truncation_interval_secs: cli.truncation_interval_secs,
        truncation_check_every: cli.truncation_check_every,
        proof_of_life_interval: cli.proof_of_life_interval,
    };
    (config, cli.command)
}
