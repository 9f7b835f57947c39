//! Storage Adapter trait
//!
//! The persistence primitives the engine is written against. Each backend
//! (in-memory, SQLite) implements this trait with its own logic; the engine
//! never sees a concrete backend.

use async_trait::async_trait;

use crate::data::error::StorageError;
use crate::data::types::{
    AggregatedQuery, AggregatedRecord, BucketDelta, BucketKey, Bounds, CollectionEntry,
    CollectionId, CollectionStats, DeletePredicate, NameMapping, RawQuery, RawRecord,
};

#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Short backend name for logs and errors
    fn backend_name(&self) -> &'static str;

    // ==================== Aggregated Records ====================

    /// Atomically create the bucket record or fold the delta into it.
    ///
    /// Must behave as a single conditional increment: two concurrent calls
    /// for the same bucket never lose an update. Returns
    /// [`StorageError::Conflict`] when the backend could not apply the
    /// update because of contention; the caller may retry.
    async fn upsert_increment(
        &self,
        collection: &CollectionId,
        key: &BucketKey,
        delta: &BucketDelta,
    ) -> Result<(), StorageError>;

    /// Read aggregated records ordered by origin
    async fn find_aggregated(
        &self,
        collection: &CollectionId,
        attr_name: &str,
        query: &AggregatedQuery,
    ) -> Result<Vec<AggregatedRecord>, StorageError>;

    // ==================== Raw Records ====================

    /// Append a raw record. Bounded collections evict their oldest records
    /// as part of the insert.
    async fn insert(&self, collection: &CollectionId, record: &RawRecord)
    -> Result<(), StorageError>;

    /// Read raw records ordered by insertion
    async fn find_raw(
        &self,
        collection: &CollectionId,
        query: &RawQuery,
    ) -> Result<Vec<RawRecord>, StorageError>;

    // ==================== Retention ====================

    /// Delete records matching the predicate, returning how many went away
    async fn delete_where(
        &self,
        collection: &CollectionId,
        predicate: &DeletePredicate,
    ) -> Result<u64, StorageError>;

    /// Mark a raw collection as bounded. Idempotent; later calls replace
    /// the bounds.
    async fn create_bounded(
        &self,
        collection: &CollectionId,
        bounds: Bounds,
    ) -> Result<(), StorageError>;

    async fn collection_size(
        &self,
        collection: &CollectionId,
    ) -> Result<CollectionStats, StorageError>;

    /// Every collection holding records, raw and aggregated
    async fn list_collections(&self) -> Result<Vec<CollectionEntry>, StorageError>;

    // ==================== Name Mappings ====================

    /// Insert the mapping unless one exists for the same readable name.
    /// Returns the stored mapping, which is the existing one on conflict.
    async fn insert_name_mapping(&self, mapping: &NameMapping)
    -> Result<NameMapping, StorageError>;

    async fn find_name_mapping(
        &self,
        database: &str,
        readable: &str,
    ) -> Result<Option<NameMapping>, StorageError>;
}
