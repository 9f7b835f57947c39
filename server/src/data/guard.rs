//! Adapter boundary guard
//!
//! Wraps any [`StorageAdapter`] so every call gets a time budget and
//! transient failures are retried with backoff. Write conflicts pass through
//! untouched; the aggregator owns their retry policy.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::data::error::StorageError;
use crate::data::traits::StorageAdapter;
use crate::data::types::{
    AggregatedQuery, AggregatedRecord, BucketDelta, BucketKey, Bounds, CollectionEntry,
    CollectionId, CollectionStats, DeletePredicate, NameMapping, RawQuery, RawRecord,
};
use crate::utils::retry::{DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS, retry_with_backoff_async};

/// Which failures a guarded call may retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replay {
    /// Idempotent call: timeouts and unavailability are both retried
    Transient,
    /// Non-idempotent write: a timed out call may have been applied, so only
    /// retry when the backend was never reached
    UnavailableOnly,
}

impl Replay {
    fn allows(self, err: &StorageError) -> bool {
        match self {
            Self::Transient => err.is_transient(),
            Self::UnavailableOnly => matches!(err, StorageError::Unavailable { .. }),
        }
    }
}

pub struct GuardedStorage {
    inner: Arc<dyn StorageAdapter>,
    timeout: Duration,
    max_attempts: u32,
    base_delay_ms: u64,
}

impl GuardedStorage {
    pub fn new(inner: Arc<dyn StorageAdapter>, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
        }
    }

    pub fn with_retry(mut self, max_attempts: u32, base_delay_ms: u64) -> Self {
        self.max_attempts = max_attempts;
        self.base_delay_ms = base_delay_ms;
        self
    }

    async fn guarded<T, F, Fut>(
        &self,
        op: &'static str,
        replay: Replay,
        call: F,
    ) -> Result<T, StorageError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let backend = self.inner.backend_name();
        let timeout = self.timeout;
        let timeout_ms = timeout.as_millis() as u64;
        let call = &call;

        let result = retry_with_backoff_async(
            self.max_attempts,
            self.base_delay_ms,
            |e: &StorageError| replay.allows(e),
            || async move {
                match tokio::time::timeout(timeout, call()).await {
                    Ok(result) => result,
                    Err(_) => Err(StorageError::timeout(backend, timeout_ms)),
                }
            },
        )
        .await;

        match result {
            Ok((value, _)) => Ok(value),
            Err((e, attempts)) => {
                if e.is_transient() {
                    tracing::warn!(backend, op, attempts, error = %e, "Storage call failed");
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl StorageAdapter for GuardedStorage {
    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }

    async fn upsert_increment(
        &self,
        collection: &CollectionId,
        key: &BucketKey,
        delta: &BucketDelta,
    ) -> Result<(), StorageError> {
        self.guarded("upsert_increment", Replay::UnavailableOnly, || {
            self.inner.upsert_increment(collection, key, delta)
        })
        .await
    }

    async fn find_aggregated(
        &self,
        collection: &CollectionId,
        attr_name: &str,
        query: &AggregatedQuery,
    ) -> Result<Vec<AggregatedRecord>, StorageError> {
        self.guarded("find_aggregated", Replay::Transient, || {
            self.inner.find_aggregated(collection, attr_name, query)
        })
        .await
    }

    async fn insert(
        &self,
        collection: &CollectionId,
        record: &RawRecord,
    ) -> Result<(), StorageError> {
        self.guarded("insert", Replay::UnavailableOnly, || {
            self.inner.insert(collection, record)
        })
        .await
    }

    async fn find_raw(
        &self,
        collection: &CollectionId,
        query: &RawQuery,
    ) -> Result<Vec<RawRecord>, StorageError> {
        self.guarded("find_raw", Replay::Transient, || {
            self.inner.find_raw(collection, query)
        })
        .await
    }

    async fn delete_where(
        &self,
        collection: &CollectionId,
        predicate: &DeletePredicate,
    ) -> Result<u64, StorageError> {
        // Deleting the N oldest twice would over-delete
        let replay = match predicate {
            DeletePredicate::OldestRaw(_) => Replay::UnavailableOnly,
            _ => Replay::Transient,
        };
        self.guarded("delete_where", replay, || {
            self.inner.delete_where(collection, predicate)
        })
        .await
    }

    async fn create_bounded(
        &self,
        collection: &CollectionId,
        bounds: Bounds,
    ) -> Result<(), StorageError> {
        self.guarded("create_bounded", Replay::Transient, || {
            self.inner.create_bounded(collection, bounds)
        })
        .await
    }

    async fn collection_size(
        &self,
        collection: &CollectionId,
    ) -> Result<CollectionStats, StorageError> {
        self.guarded("collection_size", Replay::Transient, || {
            self.inner.collection_size(collection)
        })
        .await
    }

    async fn list_collections(&self) -> Result<Vec<CollectionEntry>, StorageError> {
        self.guarded("list_collections", Replay::Transient, || {
            self.inner.list_collections()
        })
        .await
    }

    async fn insert_name_mapping(
        &self,
        mapping: &NameMapping,
    ) -> Result<NameMapping, StorageError> {
        self.guarded("insert_name_mapping", Replay::Transient, || {
            self.inner.insert_name_mapping(mapping)
        })
        .await
    }

    async fn find_name_mapping(
        &self,
        database: &str,
        readable: &str,
    ) -> Result<Option<NameMapping>, StorageError> {
        self.guarded("find_name_mapping", Replay::Transient, || {
            self.inner.find_name_mapping(database, readable)
        })
        .await
    }
}
