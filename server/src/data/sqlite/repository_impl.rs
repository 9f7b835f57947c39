//! StorageAdapter trait implementation for SQLite
//!
//! Delegates every adapter call to the repository functions, so the engine
//! sees the SQLite backend only through the trait.

use async_trait::async_trait;

use crate::data::error::StorageError;
use crate::data::traits::StorageAdapter;
use crate::data::types::{
    AggregatedQuery, AggregatedRecord, BucketDelta, BucketKey, Bounds, CollectionEntry,
    CollectionId, CollectionStats, DeletePredicate, NameMapping, RawQuery, RawRecord,
};

use super::SqliteStorage;
use super::repositories::{aggregated, mapping, raw, retention};

#[async_trait]
impl StorageAdapter for SqliteStorage {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    // ==================== Aggregated Records ====================

    async fn upsert_increment(
        &self,
        collection: &CollectionId,
        key: &BucketKey,
        delta: &BucketDelta,
    ) -> Result<(), StorageError> {
        aggregated::upsert_increment(self.pool(), collection, key, delta).await
    }

    async fn find_aggregated(
        &self,
        collection: &CollectionId,
        attr_name: &str,
        query: &AggregatedQuery,
    ) -> Result<Vec<AggregatedRecord>, StorageError> {
        aggregated::find_buckets(self.pool(), collection, attr_name, query).await
    }

    // ==================== Raw Records ====================

    async fn insert(
        &self,
        collection: &CollectionId,
        record: &RawRecord,
    ) -> Result<(), StorageError> {
        let evicted = raw::insert_record(self.pool(), collection, record).await?;
        if evicted > 0 {
            tracing::trace!(%collection, evicted, "Bounded collection evicted oldest records");
        }
        Ok(())
    }

    async fn find_raw(
        &self,
        collection: &CollectionId,
        query: &RawQuery,
    ) -> Result<Vec<RawRecord>, StorageError> {
        raw::find_records(self.pool(), collection, query).await
    }

    // ==================== Retention ====================

    async fn delete_where(
        &self,
        collection: &CollectionId,
        predicate: &DeletePredicate,
    ) -> Result<u64, StorageError> {
        retention::delete_where(self.pool(), collection, predicate).await
    }

    async fn create_bounded(
        &self,
        collection: &CollectionId,
        bounds: Bounds,
    ) -> Result<(), StorageError> {
        retention::upsert_bounds(self.pool(), collection, bounds).await
    }

    async fn collection_size(
        &self,
        collection: &CollectionId,
    ) -> Result<CollectionStats, StorageError> {
        retention::collection_size(self.pool(), collection).await
    }

    async fn list_collections(&self) -> Result<Vec<CollectionEntry>, StorageError> {
        retention::list_collections(self.pool()).await
    }

    // ==================== Name Mappings ====================

    async fn insert_name_mapping(
        &self,
        mapping: &NameMapping,
    ) -> Result<NameMapping, StorageError> {
        mapping::insert_mapping(self.pool(), mapping).await
    }

    async fn find_name_mapping(
        &self,
        database: &str,
        readable: &str,
    ) -> Result<Option<NameMapping>, StorageError> {
        mapping::find_mapping(self.pool(), database, readable).await
    }
}
