//! Data storage layer
//!
//! Provides the persistence side of the engine:
//! - `traits` - the Storage Adapter trait the engine is written against
//! - `memory` - in-process backend (default, tests and ephemeral deployments)
//! - `sqlite` - persistent backend for single-node deployments
//! - `guard` - timeout and transient-failure retry around any adapter
//! - `types` - records, buckets, collection identifiers and queries
//! - `error` - unified error type for all backends
//!
//! ## Backend Support
//!
//! Both backends implement `StorageAdapter`; `StorageService` picks one from
//! configuration and hands out a guarded trait object.

pub mod error;
pub mod guard;
pub mod memory;
pub mod sqlite;
pub mod traits;
pub mod types;

pub use error::StorageError;
pub use guard::GuardedStorage;
pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;
pub use traits::StorageAdapter;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::config::StorageBackend;
use crate::core::storage::AppStorage;

/// Storage service enum
///
/// Wraps the backend selected by configuration. Services are stored as Arc so
/// the adapter handed to the engine and the service share one backend.
pub enum StorageService {
    /// In-memory backend (default)
    Memory(Arc<MemoryStorage>),
    /// SQLite backend (embedded, persistent)
    Sqlite(Arc<SqliteStorage>),
}

impl StorageService {
    /// Initialize the storage service based on configuration
    pub async fn init(backend: StorageBackend, storage: &AppStorage) -> Result<Self, StorageError> {
        match backend {
            StorageBackend::Memory => {
                tracing::debug!("Using in-memory storage, data is lost on restart");
                Ok(Self::Memory(Arc::new(MemoryStorage::new())))
            }
            StorageBackend::Sqlite => {
                let service = SqliteStorage::init(storage.database_path()).await?;
                Ok(Self::Sqlite(Arc::new(service)))
            }
        }
    }

    /// Get the backend type
    pub fn backend(&self) -> StorageBackend {
        match self {
            Self::Memory(_) => StorageBackend::Memory,
            Self::Sqlite(_) => StorageBackend::Sqlite,
        }
    }

    /// The raw backend behind the adapter trait, without the guard
    pub fn raw_adapter(&self) -> Arc<dyn StorageAdapter> {
        match self {
            Self::Memory(m) => Arc::clone(m) as Arc<dyn StorageAdapter>,
            Self::Sqlite(s) => Arc::clone(s) as Arc<dyn StorageAdapter>,
        }
    }

    /// The adapter the engine uses: every call bounded by `timeout` and
    /// transient failures retried
    pub fn adapter(&self, timeout: Duration) -> Arc<dyn StorageAdapter> {
        Arc::new(GuardedStorage::new(self.raw_adapter(), timeout))
    }

    /// Run a WAL checkpoint (SQLite only)
    pub async fn checkpoint(&self) -> Result<(), StorageError> {
        match self {
            Self::Memory(_) => Ok(()),
            Self::Sqlite(s) => s.checkpoint().await,
        }
    }

    /// Close the backend gracefully
    pub async fn close(&self) {
        match self {
            Self::Memory(_) => {}
            Self::Sqlite(s) => s.close().await,
        }
    }

    /// Start the background checkpoint task (SQLite only)
    pub fn start_checkpoint_task(
        &self,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        match self {
            Self::Memory(_) => None,
            Self::Sqlite(s) => Some(s.start_checkpoint_task(shutdown_rx)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::{CollectionId, RawQuery, RawRecord};
    use chrono::{TimeZone, Utc};

    fn record() -> RawRecord {
        RawRecord {
            recv_time: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            entity_id: "Room1".to_string(),
            entity_type: "Room".to_string(),
            attr_name: "temperature".to_string(),
            attr_type: "Number".to_string(),
            attr_value: serde_json::json!(21.5),
        }
    }

    #[tokio::test]
    async fn test_memory_service() {
        let storage = AppStorage::init_for_test(std::env::temp_dir());
        let service = StorageService::init(StorageBackend::Memory, &storage)
            .await
            .unwrap();
        assert_eq!(service.backend(), StorageBackend::Memory);
        assert!(service.start_checkpoint_task(watch::channel(false).1).is_none());

        let adapter = service.adapter(Duration::from_secs(1));
        let collection = CollectionId::new("sth_orion", "sth_/_Room1_Room");
        adapter.insert(&collection, &record()).await.unwrap();

        // Guarded adapter and raw backend share the same data
        let records = service
            .raw_adapter()
            .find_raw(&collection, &RawQuery::default())
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        service.close().await;
    }

    #[tokio::test]
    async fn test_sqlite_service() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AppStorage::init_for_test(dir.path().to_path_buf());
        let service = StorageService::init(StorageBackend::Sqlite, &storage)
            .await
            .unwrap();
        assert_eq!(service.backend(), StorageBackend::Sqlite);
        assert!(storage.database_path().exists());

        let adapter = service.adapter(Duration::from_secs(5));
        let collection = CollectionId::new("sth_orion", "sth_/_Room1_Room");
        adapter.insert(&collection, &record()).await.unwrap();
        assert_eq!(
            adapter
                .find_raw(&collection, &RawQuery::default())
                .await
                .unwrap()
                .len(),
            1
        );

        service.checkpoint().await.unwrap();
        service.close().await;
    }
}
