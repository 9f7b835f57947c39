//! Unified error type for the storage layer
//!
//! Every Storage Adapter backend reports failures through [`StorageError`] so
//! the engine can tell write conflicts (retried per bucket update) apart from
//! availability failures (retried at the adapter boundary).

use thiserror::Error;

/// SQLite primary result codes signalling lock contention
const SQLITE_BUSY_CODES: [&str; 2] = ["5", "6"];

#[derive(Error, Debug)]
pub enum StorageError {
    /// Concurrent writers collided on the same record
    #[error("Write conflict on {collection}: {reason}")]
    Conflict { collection: String, reason: String },

    /// Call exceeded its time budget
    #[error("Storage call timed out after {timeout_ms}ms on {backend}")]
    Timeout {
        backend: &'static str,
        timeout_ms: u64,
    },

    /// Backend not reachable (closed pool, connection loss)
    #[error("Backend {backend} is not available: {reason}")]
    Unavailable {
        backend: &'static str,
        reason: String,
    },

    /// SQLite database error
    #[error("SQLite error: {0}")]
    Sqlite(sqlx::Error),

    /// Migration failed
    #[error("Migration {version} ({name}) failed: {error}")]
    MigrationFailed {
        version: i32,
        name: String,
        error: String,
    },

    /// Stored document could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn conflict(collection: impl ToString, reason: impl Into<String>) -> Self {
        Self::Conflict {
            collection: collection.to_string(),
            reason: reason.into(),
        }
    }

    pub fn timeout(backend: &'static str, timeout_ms: u64) -> Self {
        Self::Timeout {
            backend,
            timeout_ms,
        }
    }

    pub fn unavailable(backend: &'static str, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            backend,
            reason: reason.into(),
        }
    }

    /// Classify a sqlx error: lock contention becomes a conflict, pool
    /// exhaustion and IO become unavailability.
    pub fn from_sqlite(e: sqlx::Error, collection: impl ToString) -> Self {
        match &e {
            sqlx::Error::Database(db) => {
                let busy = db
                    .code()
                    .is_some_and(|code| SQLITE_BUSY_CODES.iter().any(|busy| code == *busy))
                    || db.message().contains("database is locked");
                if busy {
                    Self::conflict(collection, db.message().to_string())
                } else {
                    Self::Sqlite(e)
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::unavailable("sqlite", e.to_string())
            }
            _ => Self::Sqlite(e),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Errors worth retrying with backoff at the adapter boundary
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unavailable { .. })
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        Self::from_sqlite(e, "unknown")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_error_display() {
        let err = StorageError::timeout("sqlite", 2500);
        assert_eq!(err.to_string(), "Storage call timed out after 2500ms on sqlite");
    }

    #[test]
    fn test_conflict_error_display() {
        let err = StorageError::conflict("sth_orion.sth_/_Room1", "bucket locked");
        assert_eq!(
            err.to_string(),
            "Write conflict on sth_orion.sth_/_Room1: bucket locked"
        );
        assert!(err.is_conflict());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_is_transient() {
        assert!(StorageError::timeout("memory", 10).is_transient());
        assert!(StorageError::unavailable("sqlite", "pool closed").is_transient());
        assert!(
            !StorageError::MigrationFailed {
                version: 1,
                name: "initial".to_string(),
                error: "boom".to_string(),
            }
            .is_transient()
        );
    }

    #[test]
    fn test_pool_errors_are_unavailable() {
        let err = StorageError::from(sqlx::Error::PoolTimedOut);
        assert!(err.is_transient());
        let err = StorageError::from(sqlx::Error::PoolClosed);
        assert!(matches!(err, StorageError::Unavailable { backend: "sqlite", .. }));
    }
}
