//! In-memory Storage Adapter
//!
//! Default backend for development and tests. Collections live in `DashMap`s;
//! every mutation happens while holding the collection's shard entry, which
//! makes bucket upserts and bounded inserts atomic per collection.

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::data::error::StorageError;
use crate::data::traits::StorageAdapter;
use crate::data::types::{
    AggregatedQuery, AggregatedRecord, BucketDelta, BucketKey, Bounds, CollectionClass,
    CollectionEntry, CollectionId, CollectionStats, DeletePredicate, NameMapping, RawQuery,
    RawRecord,
};

const BACKEND: &str = "memory";

#[derive(Debug, Default)]
struct RawCollection {
    records: VecDeque<RawRecord>,
    bytes: u64,
    bounds: Bounds,
}

impl RawCollection {
    fn stats(&self) -> CollectionStats {
        CollectionStats {
            bytes: self.bytes,
            docs: self.records.len() as u64,
        }
    }

    fn push(&mut self, record: RawRecord) {
        self.bytes += record.size_bytes();
        self.records.push_back(record);
    }

    fn pop_oldest(&mut self) -> bool {
        match self.records.pop_front() {
            Some(record) => {
                self.bytes = self.bytes.saturating_sub(record.size_bytes());
                true
            }
            None => false,
        }
    }

    /// Evict oldest records until the collection fits its bounds
    fn evict_to_bounds(&mut self) -> u64 {
        let mut evicted = 0;
        while self.bounds.exceeded_by(&self.stats()) && self.pop_oldest() {
            evicted += 1;
        }
        evicted
    }

    fn retain_received_since(&mut self, cutoff: chrono::DateTime<chrono::Utc>) -> u64 {
        let before = self.records.len();
        self.records.retain(|r| r.recv_time >= cutoff);
        self.bytes = self.records.iter().map(RawRecord::size_bytes).sum();
        (before - self.records.len()) as u64
    }
}

/// In-memory backend
#[derive(Debug, Default)]
pub struct MemoryStorage {
    raw: DashMap<CollectionId, RawCollection>,
    aggregated: DashMap<CollectionId, BTreeMap<BucketKey, AggregatedRecord>>,
    mappings: DashMap<(String, String), NameMapping>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    async fn upsert_increment(
        &self,
        collection: &CollectionId,
        key: &BucketKey,
        delta: &BucketDelta,
    ) -> Result<(), StorageError> {
        let mut buckets = self.aggregated.entry(collection.clone()).or_default();
        match buckets.get_mut(key) {
            Some(record) => record.fold(delta),
            None => {
                buckets.insert(key.clone(), AggregatedRecord::new(key.clone(), delta));
            }
        }
        Ok(())
    }

    async fn find_aggregated(
        &self,
        collection: &CollectionId,
        attr_name: &str,
        query: &AggregatedQuery,
    ) -> Result<Vec<AggregatedRecord>, StorageError> {
        let Some(buckets) = self.aggregated.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(buckets
            .values()
            .filter(|r| r.key.attr_name == attr_name)
            .filter(|r| query.matches(r.key.resolution, r.key.origin))
            .cloned()
            .collect())
    }

    async fn insert(
        &self,
        collection: &CollectionId,
        record: &RawRecord,
    ) -> Result<(), StorageError> {
        let mut raw = self.raw.entry(collection.clone()).or_default();
        raw.push(record.clone());
        let evicted = raw.evict_to_bounds();
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
        let Some(raw) = self.raw.get(collection) else {
            return Ok(Vec::new());
        };
        let matching: Vec<&RawRecord> = raw
            .records
            .iter()
            .filter(|r| query.matches(r.recv_time))
            .collect();

        let selected: Vec<RawRecord> = match query.last_n {
            Some(n) => matching[matching.len().saturating_sub(n)..]
                .iter()
                .map(|r| (*r).clone())
                .collect(),
            None => matching
                .into_iter()
                .skip(query.offset)
                .take(query.limit.unwrap_or(usize::MAX))
                .cloned()
                .collect(),
        };
        Ok(selected)
    }

    async fn delete_where(
        &self,
        collection: &CollectionId,
        predicate: &DeletePredicate,
    ) -> Result<u64, StorageError> {
        let deleted = match predicate {
            DeletePredicate::RecvTimeBefore(cutoff) => self
                .raw
                .get_mut(collection)
                .map(|mut raw| raw.retain_received_since(*cutoff))
                .unwrap_or(0),
            DeletePredicate::OriginBefore(cutoff) => self
                .aggregated
                .get_mut(collection)
                .map(|mut buckets| {
                    let before = buckets.len();
                    buckets.retain(|key, _| key.origin >= *cutoff);
                    (before - buckets.len()) as u64
                })
                .unwrap_or(0),
            DeletePredicate::OldestRaw(count) => self
                .raw
                .get_mut(collection)
                .map(|mut raw| {
                    let mut deleted = 0;
                    while deleted < *count && raw.pop_oldest() {
                        deleted += 1;
                    }
                    deleted
                })
                .unwrap_or(0),
        };
        Ok(deleted)
    }

    async fn create_bounded(
        &self,
        collection: &CollectionId,
        bounds: Bounds,
    ) -> Result<(), StorageError> {
        let mut raw = self.raw.entry(collection.clone()).or_default();
        raw.bounds = bounds;
        Ok(())
    }

    async fn collection_size(
        &self,
        collection: &CollectionId,
    ) -> Result<CollectionStats, StorageError> {
        if let Some(raw) = self.raw.get(collection) {
            return Ok(raw.stats());
        }
        Ok(self
            .aggregated
            .get(collection)
            .map(|buckets| CollectionStats {
                bytes: buckets.values().map(AggregatedRecord::size_bytes).sum(),
                docs: buckets.len() as u64,
            })
            .unwrap_or_default())
    }

    async fn list_collections(&self) -> Result<Vec<CollectionEntry>, StorageError> {
        let raw = self.raw.iter().map(|e| CollectionEntry {
            id: e.key().clone(),
            class: CollectionClass::Raw,
        });
        let aggregated = self.aggregated.iter().map(|e| CollectionEntry {
            id: e.key().clone(),
            class: CollectionClass::Aggregated,
        });
        let mut entries: Vec<CollectionEntry> = raw.chain(aggregated).collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }

    async fn insert_name_mapping(
        &self,
        mapping: &NameMapping,
    ) -> Result<NameMapping, StorageError> {
        let key = (mapping.database.clone(), mapping.readable.clone());
        match self.mappings.entry(key) {
            Entry::Occupied(existing) => Ok(existing.get().clone()),
            Entry::Vacant(slot) => Ok(slot.insert(mapping.clone()).clone()),
        }
    }

    async fn find_name_mapping(
        &self,
        database: &str,
        readable: &str,
    ) -> Result<Option<NameMapping>, StorageError> {
        Ok(self
            .mappings
            .get(&(database.to_string(), readable.to_string()))
            .map(|m| m.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::types::{BucketValue, Resolution};
    use chrono::{TimeDelta, TimeZone, Utc};
    use std::sync::Arc;

    fn collection() -> CollectionId {
        CollectionId::new("sth_orion", "sth_/_Room1_Room_temperature")
    }

    fn raw(i: i64) -> RawRecord {
        RawRecord {
            recv_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + TimeDelta::seconds(i),
            entity_id: "Room1".to_string(),
            entity_type: "Room".to_string(),
            attr_name: "temperature".to_string(),
            attr_type: "Number".to_string(),
            attr_value: serde_json::json!(i),
        }
    }

    fn numeric(value: f64) -> BucketDelta {
        BucketDelta {
            attr_type: "Number".to_string(),
            value: BucketValue::Numeric(value),
            at: Utc.with_ymd_and_hms(2024, 1, 1, 10, 15, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_upsert_creates_then_increments() {
        let storage = MemoryStorage::new();
        let key = BucketKey::new(Resolution::Hour, numeric(0.0).at, "temperature");

        for v in [3.0, 7.0, 2.0] {
            storage
                .upsert_increment(&collection(), &key, &numeric(v))
                .await
                .unwrap();
        }

        let records = storage
            .find_aggregated(
                &collection(),
                "temperature",
                &AggregatedQuery::new(Resolution::Hour),
            )
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        let stats = records[0].numeric.unwrap();
        assert_eq!((records[0].count, stats.sum, stats.min, stats.max), (3, 12.0, 2.0, 7.0));
    }

    #[tokio::test]
    async fn test_concurrent_upserts_do_not_lose_updates() {
        let storage = Arc::new(MemoryStorage::new());
        let key = BucketKey::new(Resolution::Minute, numeric(0.0).at, "temperature");

        let mut handles = Vec::new();
        for i in 0..200 {
            let storage = Arc::clone(&storage);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                storage
                    .upsert_increment(&collection(), &key, &numeric(i as f64))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let records = storage
            .find_aggregated(
                &collection(),
                "temperature",
                &AggregatedQuery::new(Resolution::Minute),
            )
            .await
            .unwrap();
        assert_eq!(records[0].count, 200);
        assert_eq!(records[0].numeric.unwrap().sum, (0..200).sum::<i32>() as f64);
    }

    #[tokio::test]
    async fn test_bounded_insert_evicts_oldest() {
        let storage = MemoryStorage::new();
        storage
            .create_bounded(
                &collection(),
                Bounds {
                    max_bytes: None,
                    max_docs: Some(3),
                },
            )
            .await
            .unwrap();

        for i in 0..5 {
            storage.insert(&collection(), &raw(i)).await.unwrap();
        }

        let records = storage
            .find_raw(&collection(), &RawQuery::default())
            .await
            .unwrap();
        let values: Vec<_> = records.iter().map(|r| r.attr_value.clone()).collect();
        assert_eq!(values, vec![serde_json::json!(2), serde_json::json!(3), serde_json::json!(4)]);
    }

    #[tokio::test]
    async fn test_delete_oldest_and_by_time() {
        let storage = MemoryStorage::new();
        for i in 0..10 {
            storage.insert(&collection(), &raw(i)).await.unwrap();
        }

        let deleted = storage
            .delete_where(&collection(), &DeletePredicate::OldestRaw(3))
            .await
            .unwrap();
        assert_eq!(deleted, 3);

        let deleted = storage
            .delete_where(
                &collection(),
                &DeletePredicate::RecvTimeBefore(raw(5).recv_time),
            )
            .await
            .unwrap();
        assert_eq!(deleted, 2);

        let stats = storage.collection_size(&collection()).await.unwrap();
        assert_eq!(stats.docs, 5);
        let expected: u64 = (5..10).map(|i| raw(i).size_bytes()).sum();
        assert_eq!(stats.bytes, expected);
    }

    #[tokio::test]
    async fn test_find_raw_last_n_and_paging() {
        let storage = MemoryStorage::new();
        for i in 0..10 {
            storage.insert(&collection(), &raw(i)).await.unwrap();
        }

        let last = storage
            .find_raw(
                &collection(),
                &RawQuery {
                    last_n: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(last, vec![raw(8), raw(9)]);

        let page = storage
            .find_raw(
                &collection(),
                &RawQuery {
                    offset: 3,
                    limit: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page, vec![raw(3), raw(4)]);
    }

    #[tokio::test]
    async fn test_name_mapping_insert_if_absent() {
        let storage = MemoryStorage::new();
        let first = NameMapping {
            database: "sth_orion".to_string(),
            readable: "sth_/very/long".to_string(),
            collection: "sth_abc".to_string(),
            created_at: Utc::now(),
        };
        let second = NameMapping {
            collection: "sth_other".to_string(),
            ..first.clone()
        };

        assert_eq!(storage.insert_name_mapping(&first).await.unwrap(), first);
        assert_eq!(storage.insert_name_mapping(&second).await.unwrap(), first);
        assert_eq!(
            storage
                .find_name_mapping("sth_orion", "sth_/very/long")
                .await
                .unwrap(),
            Some(first)
        );
    }

    #[tokio::test]
    async fn test_list_collections_reports_class() {
        let storage = MemoryStorage::new();
        let aggr = CollectionId::new("sth_orion", "sth_/_Room1_Room_temperature.aggr");
        storage.insert(&collection(), &raw(0)).await.unwrap();
        storage
            .upsert_increment(
                &aggr,
                &BucketKey::new(Resolution::Day, numeric(1.0).at, "temperature"),
                &numeric(1.0),
            )
            .await
            .unwrap();

        let entries = storage.list_collections().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.contains(&CollectionEntry {
            id: aggr,
            class: CollectionClass::Aggregated
        }));
    }
}
