//! Platform-aware data storage directory management
//!
//! ## Platform Paths
//!
//! | Type | Windows | macOS | Linux |
//! |------|---------|-------|-------|
//! | Data | `%APPDATA%\Comet\` | `~/Library/Application Support/Comet/` | `$XDG_DATA_HOME/comet/` |
//!
//! Only the SQLite backend writes here; the memory backend never touches disk.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;

use super::config::{AppConfig, StorageBackend};
use super::constants::{APP_DOT_FOLDER, APP_NAME, ENV_DATA_DIR, SQLITE_DB_FILENAME};
use crate::utils::file::expand_path;

/// Subdirectory holding the SQLite database and its WAL files
const SQLITE_SUBDIR: &str = "sqlite";

/// Application storage manager
#[derive(Debug, Clone)]
pub struct AppStorage {
    data_dir: PathBuf,
    database_path: PathBuf,
}

impl AppStorage {
    /// Resolve storage paths, creating the data directory for the SQLite backend
    pub async fn init(config: &AppConfig) -> Result<Self> {
        let data_dir = Self::resolve_data_dir();
        let database_path = config
            .database
            .path
            .clone()
            .unwrap_or_else(|| data_dir.join(SQLITE_SUBDIR).join(SQLITE_DB_FILENAME));

        if config.database.backend == StorageBackend::Sqlite {
            if let Some(parent) = database_path.parent() {
                tokio::fs::create_dir_all(parent).await.with_context(|| {
                    format!("Failed to create database directory: {}", parent.display())
                })?;
            }
            tracing::debug!(path = %database_path.display(), "SQLite database path resolved");
        }

        Ok(Self {
            data_dir,
            database_path,
        })
    }

    /// Resolve data directory from env var or platform default
    pub fn resolve_data_dir() -> PathBuf {
        // Check env var override first
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            return expand_path(&dir);
        }

        // Use platform-specific directory
        if let Some(proj_dirs) = ProjectDirs::from("", "", APP_NAME) {
            return proj_dirs.data_dir().to_path_buf();
        }

        // Fallback to local .comet
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        cwd.join(APP_DOT_FOLDER)
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// SQLite database file (configured path or `<data_dir>/sqlite/comet.db`)
    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    /// Create AppStorage for testing with a specific data directory
    #[cfg(test)]
    pub fn init_for_test(data_dir: PathBuf) -> Self {
        let database_path = data_dir.join(SQLITE_SUBDIR).join(SQLITE_DB_FILENAME);
        Self {
            data_dir,
            database_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_path_under_data_dir() {
        let storage = AppStorage::init_for_test(PathBuf::from("/var/lib/comet"));
        assert_eq!(storage.data_dir(), Path::new("/var/lib/comet"));
        assert_eq!(
            storage.database_path(),
            Path::new("/var/lib/comet/sqlite/comet.db")
        );
    }

    #[test]
    fn test_resolve_data_dir_fallback() {
        // Without env var set, should return a non-empty path
        // SAFETY: Test runs single-threaded, no concurrent access to env var
        unsafe { std::env::remove_var(ENV_DATA_DIR) };
        let path = AppStorage::resolve_data_dir();
        assert!(!path.as_os_str().is_empty());
    }
}
