// =============================================================================
// Application Identity
// =============================================================================

/// Application name in title case (for display and platform directories)
pub const APP_NAME: &str = "Comet";

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "comet";

/// Unix-style dotfile folder name
pub const APP_DOT_FOLDER: &str = ".comet";

// =============================================================================
// Configuration Files
// =============================================================================

/// Config file name
pub const CONFIG_FILE_NAME: &str = "comet.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "COMET_CONFIG";

// =============================================================================
// Environment Variables - Server
// =============================================================================

/// Environment variable for server host
pub const ENV_HOST: &str = "COMET_HOST";

/// Environment variable for server port
pub const ENV_PORT: &str = "COMET_PORT";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "COMET_LOG";

/// Environment variable for the comma separated resolution list
pub const ENV_AGGREGATION: &str = "COMET_AGGREGATION";

/// Environment variable for dropping empty aggregated entries from history responses
pub const ENV_FILTER_OUT_EMPTY: &str = "COMET_FILTER_OUT_EMPTY";

// =============================================================================
// Server Defaults
// =============================================================================

/// Default server host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port
pub const DEFAULT_PORT: u16 = 8666;

/// Default active resolutions
pub const DEFAULT_AGGREGATION: &[&str] = &["day", "hour", "minute"];

/// Drop aggregated entries without a value for the requested method
pub const DEFAULT_FILTER_OUT_EMPTY: bool = true;

// =============================================================================
// Environment Variables - Storage
// =============================================================================

/// Environment variable to override data directory
pub const ENV_DATA_DIR: &str = "COMET_DATA_DIR";

pub const ENV_DATABASE_BACKEND: &str = "COMET_DATABASE_BACKEND";
pub const ENV_DATABASE_PATH: &str = "COMET_DATABASE_PATH";
pub const ENV_SHOULD_STORE: &str = "COMET_SHOULD_STORE";
pub const ENV_SHOULD_HASH: &str = "COMET_SHOULD_HASH";
pub const ENV_DB_PREFIX: &str = "COMET_DB_PREFIX";
pub const ENV_COLLECTION_PREFIX: &str = "COMET_COLLECTION_PREFIX";
pub const ENV_NAMESPACE_LIMIT: &str = "COMET_NAMESPACE_LIMIT";
pub const ENV_DEFAULT_SERVICE: &str = "COMET_DEFAULT_SERVICE";
pub const ENV_DEFAULT_SERVICE_PATH: &str = "COMET_DEFAULT_SERVICE_PATH";
pub const ENV_DB_TIMEOUT_SECS: &str = "COMET_DB_TIMEOUT_SECS";

// =============================================================================
// Naming Defaults
// =============================================================================

/// Default database name prefix (database = prefix + service)
pub const DEFAULT_DB_PREFIX: &str = "sth_";

/// Default collection name prefix
pub const DEFAULT_COLLECTION_PREFIX: &str = "sth_";

/// Default `database.collection` namespace byte limit
pub const DEFAULT_NAMESPACE_LIMIT: usize = 120;

/// Default service when a notification carries none
pub const DEFAULT_SERVICE: &str = "orion";

/// Default service path when a notification carries none
pub const DEFAULT_SERVICE_PATH: &str = "/";

/// Suffix distinguishing aggregated collections from raw ones
pub const AGGREGATED_COLLECTION_SUFFIX: &str = ".aggr";

/// Default per-call storage timeout in seconds
pub const DEFAULT_DB_TIMEOUT_SECS: u64 = 10;

// =============================================================================
// Aggregation
// =============================================================================

/// Attempts per bucket update before reporting an aggregation failure
pub const AGGREGATION_MAX_ATTEMPTS: u32 = 5;

/// Base backoff between bucket update attempts
pub const AGGREGATION_BASE_DELAY_MS: u64 = 20;

// =============================================================================
// Truncation (Retention)
// =============================================================================

pub const ENV_TRUNCATION_EXPIRE_AFTER_SECONDS: &str = "COMET_TRUNCATION_EXPIRE_AFTER_SECONDS";
pub const ENV_TRUNCATION_SIZE: &str = "COMET_TRUNCATION_SIZE";
pub const ENV_TRUNCATION_MAX: &str = "COMET_TRUNCATION_MAX";
pub const ENV_TRUNCATION_INTERVAL_SECS: &str = "COMET_TRUNCATION_INTERVAL_SECS";
pub const ENV_TRUNCATION_CHECK_EVERY: &str = "COMET_TRUNCATION_CHECK_EVERY";

/// Retention pass interval in seconds
pub const DEFAULT_TRUNCATION_INTERVAL_SECS: u64 = 60;

/// Writes per collection between post-write retention checks
pub const DEFAULT_TRUNCATION_CHECK_EVERY: u64 = 100;

/// Smallest accepted non-zero byte bound for raw collections
pub const MIN_BOUNDED_BYTES: u64 = 4096;

/// Records deleted per eviction batch
pub const RETENTION_BATCH_SIZE: u64 = 10_000;

/// Maximum eviction batches per collection per pass
pub const MAX_EVICTION_BATCHES: usize = 100;

// =============================================================================
// Logging
// =============================================================================

pub const ENV_PROOF_OF_LIFE_INTERVAL: &str = "COMET_PROOF_OF_LIFE_INTERVAL";

/// Default proof-of-life log interval in seconds (0 disables)
pub const DEFAULT_PROOF_OF_LIFE_INTERVAL_SECS: u64 = 60;

// =============================================================================
// SQLite Database
// =============================================================================

/// SQLite database filename
pub const SQLITE_DB_FILENAME: &str = "comet.db";

/// SQLite connection pool max connections
pub const SQLITE_MAX_CONNECTIONS: u32 = 5;

/// SQLite busy timeout in seconds
pub const SQLITE_BUSY_TIMEOUT_SECS: u64 = 5;

/// SQLite cache size (negative = KB, so -64000 = 64MB)
pub const SQLITE_CACHE_SIZE: &str = "-64000";

/// SQLite WAL auto-checkpoint threshold (pages, ~4MB at 1000)
pub const SQLITE_WAL_AUTOCHECKPOINT: &str = "1000";

/// WAL checkpoint interval in seconds (5 minutes)
pub const SQLITE_CHECKPOINT_INTERVAL_SECS: u64 = 300;

// =============================================================================
// HTTP
// =============================================================================

/// Default body limit for API requests (1 MB)
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

/// Tenant header of NGSI notifications and history queries
pub const HEADER_FIWARE_SERVICE: &str = "fiware-service";

/// Tenant sub-path header of NGSI notifications and history queries
pub const HEADER_FIWARE_SERVICE_PATH: &str = "fiware-servicepath";

/// Attribute / metadata name carrying the event timestamp
pub const TIME_INSTANT: &str = "TimeInstant";

// =============================================================================
// Shutdown
// =============================================================================

/// Graceful shutdown timeout in seconds
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 30;
