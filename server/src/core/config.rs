use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::types::Resolution;
use crate::utils::file::expand_path;

use super::cli::CliConfig;
use super::constants::{
    APP_DOT_FOLDER, CONFIG_FILE_NAME, DEFAULT_AGGREGATION, DEFAULT_COLLECTION_PREFIX,
    DEFAULT_DB_PREFIX, DEFAULT_DB_TIMEOUT_SECS, DEFAULT_FILTER_OUT_EMPTY, DEFAULT_HOST, DEFAULT_NAMESPACE_LIMIT,
    DEFAULT_PORT, DEFAULT_PROOF_OF_LIFE_INTERVAL_SECS, DEFAULT_SERVICE, DEFAULT_SERVICE_PATH,
    DEFAULT_TRUNCATION_CHECK_EVERY, DEFAULT_TRUNCATION_INTERVAL_SECS, MIN_BOUNDED_BYTES,
};

// =============================================================================
// Storage Backend Enum
// =============================================================================

/// Storage Adapter implementation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Sqlite,
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageBackend::Memory => write!(f, "memory"),
            StorageBackend::Sqlite => write!(f, "sqlite"),
        }
    }
}

// =============================================================================
// Store Mode Enum
// =============================================================================

/// Which record classes ingestion writes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreMode {
    OnlyRaw,
    OnlyAggregated,
    #[default]
    Both,
}

impl StoreMode {
    pub fn stores_raw(&self) -> bool {
        matches!(self, Self::OnlyRaw | Self::Both)
    }

    pub fn stores_aggregated(&self) -> bool {
        matches!(self, Self::OnlyAggregated | Self::Both)
    }

    /// Raw storage, or aggregation with at least one resolution to write
    pub fn has_write_path(&self, resolutions: &[Resolution]) -> bool {
        self.stores_raw() || (self.stores_aggregated() && !resolutions.is_empty())
    }
}

impl fmt::Display for StoreMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreMode::OnlyRaw => write!(f, "only-raw"),
            StoreMode::OnlyAggregated => write!(f, "only-aggregated"),
            StoreMode::Both => write!(f, "both"),
        }
    }
}

// =============================================================================
// File Config Structs (JSON deserialization)
// =============================================================================

/// Server configuration section
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub aggregation: Option<Vec<String>>,
    pub filter_out_empty: Option<bool>,
}

/// Truncation configuration (nested under database)
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TruncationFileConfig {
    pub expire_after_seconds: Option<u64>,
    pub size: Option<u64>,
    pub max: Option<u64>,
    pub interval_secs: Option<u64>,
    pub check_every: Option<u64>,
}

/// Database configuration section (from JSON config file)
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseFileConfig {
    /// Storage backend: memory (default) or sqlite
    pub backend: Option<StorageBackend>,
    /// SQLite database file
    pub path: Option<String>,
    pub should_store: Option<StoreMode>,
    pub should_hash: Option<bool>,
    pub prefix: Option<String>,
    pub collection_prefix: Option<String>,
    pub namespace_limit: Option<usize>,
    pub default_service: Option<String>,
    pub default_service_path: Option<String>,
    pub timeout_secs: Option<u64>,
    pub truncation: Option<TruncationFileConfig>,
}

/// Logging configuration section
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingFileConfig {
    pub proof_of_life_interval: Option<u64>,
}

/// File-based configuration (JSON)
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub server: Option<ServerFileConfig>,
    pub database: Option<DatabaseFileConfig>,
    pub logging: Option<LoggingFileConfig>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

impl FileConfig {
    /// Load configuration from a JSON file
    fn load_from_file(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading config file");
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        tracing::trace!(config = ?config, "Parsed config file");
        Ok(config)
    }

    /// Warn about unknown fields in the config
    fn warn_unknown_fields(&self) {
        if let serde_json::Value::Object(map) = &self.extra
            && !map.is_empty()
        {
            let keys_str: String = map
                .keys()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            tracing::warn!(
                fields = %keys_str,
                "Unknown fields in config file (possible typos)"
            );
        }
    }

    /// Merge another FileConfig into this one (other takes precedence)
    fn merge(&mut self, other: FileConfig) {
        // Server
        if let Some(server) = other.server {
            let current = self.server.get_or_insert_with(ServerFileConfig::default);
            if server.host.is_some() {
                tracing::trace!(host = ?server.host, "Merging server.host");
                current.host = server.host;
            }
            if server.port.is_some() {
                tracing::trace!(port = ?server.port, "Merging server.port");
                current.port = server.port;
            }
            if server.aggregation.is_some() {
                tracing::trace!(aggregation = ?server.aggregation, "Merging server.aggregation");
                current.aggregation = server.aggregation;
            }
            if server.filter_out_empty.is_some() {
                current.filter_out_empty = server.filter_out_empty;
            }
        }

        // Database (with nested truncation)
        if let Some(database) = other.database {
            let current = self.database.get_or_insert_with(DatabaseFileConfig::default);
            macro_rules! merge_field {
                ($field:ident) => {
                    if database.$field.is_some() {
                        tracing::trace!(
                            value = ?database.$field,
                            concat!("Merging database.", stringify!($field))
                        );
                        current.$field = database.$field;
                    }
                };
            }
            merge_field!(backend);
            merge_field!(path);
            merge_field!(should_store);
            merge_field!(should_hash);
            merge_field!(prefix);
            merge_field!(collection_prefix);
            merge_field!(namespace_limit);
            merge_field!(default_service);
            merge_field!(default_service_path);
            merge_field!(timeout_secs);

            if let Some(truncation) = database.truncation {
                let current_truncation = current
                    .truncation
                    .get_or_insert_with(TruncationFileConfig::default);
                if truncation.expire_after_seconds.is_some() {
                    current_truncation.expire_after_seconds = truncation.expire_after_seconds;
                }
                if truncation.size.is_some() {
                    current_truncation.size = truncation.size;
                }
                if truncation.max.is_some() {
                    current_truncation.max = truncation.max;
                }
                if truncation.interval_secs.is_some() {
                    current_truncation.interval_secs = truncation.interval_secs;
                }
                if truncation.check_every.is_some() {
                    current_truncation.check_every = truncation.check_every;
                }
            }
        }

        // Logging
        if let Some(logging) = other.logging {
            let current = self.logging.get_or_insert_with(LoggingFileConfig::default);
            if logging.proof_of_life_interval.is_some() {
                tracing::trace!(
                    interval = ?logging.proof_of_life_interval,
                    "Merging logging.proofOfLifeInterval"
                );
                current.proof_of_life_interval = logging.proof_of_life_interval;
            }
        }
    }
}

// =============================================================================
// Runtime Config Structs (final merged configuration)
// =============================================================================

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Active resolutions, in configured order
    pub aggregation: Vec<Resolution>,
    pub filter_out_empty: bool,
}

/// Truncation policy; 0 disables a dimension
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TruncationConfig {
    pub expire_after_seconds: u64,
    pub size: u64,
    pub max: u64,
    pub interval_secs: u64,
    pub check_every: u64,
}

impl TruncationConfig {
    /// No TTL, size or count bound configured
    pub fn is_disabled(&self) -> bool {
        self.expire_after_seconds == 0 && self.size == 0 && self.max == 0
    }
}

/// Storage and naming configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub backend: StorageBackend,
    /// SQLite file; `None` puts it under the platform data directory
    pub path: Option<PathBuf>,
    pub should_store: StoreMode,
    pub should_hash: bool,
    pub prefix: String,
    pub collection_prefix: String,
    pub namespace_limit: usize,
    pub default_service: String,
    pub default_service_path: String,
    pub timeout_secs: u64,
    pub truncation: TruncationConfig,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Seconds between proof-of-life lines; 0 disables
    pub proof_of_life_interval: u64,
}

/// Final merged application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from all sources
    ///
    /// Priority (lowest to highest):
    /// 1. Defaults
    /// 2. Profile directory config (~/.comet/comet.json)
    /// 3. Local directory config OR CLI-specified config path
    /// 4. CLI arguments (which include env var fallbacks via clap)
    pub fn load(cli: &CliConfig) -> Result<Self> {
        tracing::debug!("Loading application configuration");
        tracing::trace!(cli = ?cli, "CLI config");

        let mut file_config = FileConfig::default();
        let mut found_configs: Vec<String> = Vec::new();

        // 1. Load from profile dir (~/.comet/comet.json) - skip if not exists
        if let Some(profile_path) = get_profile_config_path()
            && profile_path.exists()
        {
            let profile_config = FileConfig::load_from_file(&profile_path)?;
            profile_config.warn_unknown_fields();
            file_config.merge(profile_config);
            found_configs.push(profile_path.display().to_string());
        }

        // 2. Load from CLI-specified path OR local directory
        let overlay_path = if let Some(ref path) = cli.config {
            let expanded = expand_path(&path.to_string_lossy());
            if !expanded.exists() {
                anyhow::bail!("Config file not found: {}", expanded.display());
            }
            Some(expanded)
        } else {
            let local = PathBuf::from(CONFIG_FILE_NAME);
            if local.exists() { Some(local) } else { None }
        };

        if let Some(path) = overlay_path {
            let overlay_config = FileConfig::load_from_file(&path)?;
            overlay_config.warn_unknown_fields();
            file_config.merge(overlay_config);
            found_configs.push(path.display().to_string());
        }

        tracing::debug!(configs = ?found_configs, "Config files loaded");

        let config = Self::layer(cli, file_config)?;
        config.validate()?;

        tracing::debug!(
            backend = %config.database.backend,
            should_store = %config.database.should_store,
            should_hash = config.database.should_hash,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Layer configs: defaults -> file config -> CLI/env overrides
    fn layer(cli: &CliConfig, file_config: FileConfig) -> Result<Self> {
        let file_server = file_config.server.unwrap_or_default();
        let file_database = file_config.database.unwrap_or_default();
        let file_truncation = file_database.truncation.unwrap_or_default();
        let file_logging = file_config.logging.unwrap_or_default();

        let host = cli
            .host
            .clone()
            .or(file_server.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        let port = cli.port.or(file_server.port).unwrap_or(DEFAULT_PORT);

        let filter_out_empty = cli
            .filter_out_empty
            .or(file_server.filter_out_empty)
            .unwrap_or(DEFAULT_FILTER_OUT_EMPTY);

        // aggregation: CLI/env is a comma separated list, file config an array
        let aggregation_names: Vec<String> = match &cli.aggregation {
            Some(list) => list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => file_server.aggregation.unwrap_or_else(|| {
                DEFAULT_AGGREGATION.iter().map(|s| s.to_string()).collect()
            }),
        };
        let aggregation = aggregation_names
            .iter()
            .map(|name| {
                name.parse::<Resolution>()
                    .map_err(|e| anyhow::anyhow!("Configuration error: server.aggregation: {}", e))
            })
            .collect::<Result<Vec<_>>>()?;

        let truncation = TruncationConfig {
            expire_after_seconds: cli
                .truncation_expire_after_seconds
                .or(file_truncation.expire_after_seconds)
                .unwrap_or(0),
            size: cli.truncation_size.or(file_truncation.size).unwrap_or(0),
            max: cli.truncation_max.or(file_truncation.max).unwrap_or(0),
            interval_secs: cli
                .truncation_interval_secs
                .or(file_truncation.interval_secs)
                .unwrap_or(DEFAULT_TRUNCATION_INTERVAL_SECS),
            check_every: cli
                .truncation_check_every
                .or(file_truncation.check_every)
                .unwrap_or(DEFAULT_TRUNCATION_CHECK_EVERY),
        };

        let database = DatabaseConfig {
            backend: cli
                .database_backend
                .or(file_database.backend)
                .unwrap_or_default(),
            path: cli
                .database_path
                .clone()
                .or_else(|| file_database.path.map(|p| expand_path(&p))),
            should_store: cli
                .should_store
                .or(file_database.should_store)
                .unwrap_or_default(),
            should_hash: cli
                .should_hash
                .or(file_database.should_hash)
                .unwrap_or(false),
            prefix: cli
                .db_prefix
                .clone()
                .or(file_database.prefix)
                .unwrap_or_else(|| DEFAULT_DB_PREFIX.to_string()),
            collection_prefix: cli
                .collection_prefix
                .clone()
                .or(file_database.collection_prefix)
                .unwrap_or_else(|| DEFAULT_COLLECTION_PREFIX.to_string()),
            namespace_limit: cli
                .namespace_limit
                .or(file_database.namespace_limit)
                .unwrap_or(DEFAULT_NAMESPACE_LIMIT),
            default_service: cli
                .default_service
                .clone()
                .or(file_database.default_service)
                .unwrap_or_else(|| DEFAULT_SERVICE.to_string()),
            default_service_path: cli
                .default_service_path
                .clone()
                .or(file_database.default_service_path)
                .unwrap_or_else(|| DEFAULT_SERVICE_PATH.to_string()),
            timeout_secs: cli
                .db_timeout_secs
                .or(file_database.timeout_secs)
                .unwrap_or(DEFAULT_DB_TIMEOUT_SECS),
            truncation,
        };

        let logging = LoggingConfig {
            proof_of_life_interval: cli
                .proof_of_life_interval
                .or(file_logging.proof_of_life_interval)
                .unwrap_or(DEFAULT_PROOF_OF_LIFE_INTERVAL_SECS),
        };

        Ok(Self {
            server: ServerConfig {
                host,
                port,
                aggregation,
                filter_out_empty,
            },
            database,
            logging,
        })
    }

    /// Validate the configuration for consistency and correctness
    fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            anyhow::bail!("Configuration error: server.host must not be empty");
        }

        // Port 0 would bind a random port
        if self.server.port == 0 {
            anyhow::bail!("Configuration error: server.port must be greater than 0");
        }

        let db = &self.database;

        if !db.should_store.has_write_path(&self.server.aggregation) {
            anyhow::bail!(
                "Configuration error: server.aggregation must list at least one resolution when database.shouldStore is '{}'",
                db.should_store
            );
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.server.aggregation.iter().find(|r| !seen.insert(**r)) {
            anyhow::bail!(
                "Configuration error: server.aggregation lists '{}' more than once",
                dup
            );
        }

        if !db
            .prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            anyhow::bail!(
                "Configuration error: database.prefix may only contain letters, digits, '_' and '-' (got '{}')",
                db.prefix
            );
        }

        if db.collection_prefix.contains('$') || db.collection_prefix.contains('\0') {
            anyhow::bail!("Configuration error: database.collectionPrefix must not contain '$' or NUL");
        }

        if db.namespace_limit == 0 {
            anyhow::bail!("Configuration error: database.namespaceLimit must be greater than 0");
        }

        if db.default_service.is_empty() {
            anyhow::bail!("Configuration error: database.defaultService must not be empty");
        }

        if !db.default_service_path.starts_with('/') {
            anyhow::bail!(
                "Configuration error: database.defaultServicePath must start with '/' (got '{}')",
                db.default_service_path
            );
        }

        if db.timeout_secs == 0 {
            anyhow::bail!("Configuration error: database.timeoutSecs must be greater than 0");
        }

        let truncation = &db.truncation;
        if truncation.size > 0 && truncation.size < MIN_BOUNDED_BYTES {
            anyhow::bail!(
                "Configuration error: database.truncation.size must be 0 or at least {} bytes (got {})",
                MIN_BOUNDED_BYTES,
                truncation.size
            );
        }

        if !truncation.is_disabled() && truncation.interval_secs == 0 {
            anyhow::bail!(
                "Configuration error: database.truncation.intervalSecs must be greater than 0 when truncation is enabled"
            );
        }

        if truncation.expire_after_seconds > 0 && (truncation.size > 0 || truncation.max > 0) {
            tracing::warn!(
                expire_after_seconds = truncation.expire_after_seconds,
                "database.truncation.size/max are set, expireAfterSeconds only applies to aggregated collections"
            );
        }

        if db.backend == StorageBackend::Memory && db.path.is_some() {
            tracing::warn!("database.path is ignored by the memory backend");
        }

        Ok(())
    }
}

/// Get the profile config path (~/.comet/comet.json)
fn get_profile_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(APP_DOT_FOLDER).join(CONFIG_FILE_NAME))
}
