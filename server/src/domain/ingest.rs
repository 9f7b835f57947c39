//! Ingestion coordinator
//!
//! Entry point for every attribute event:
//! 1. Resolve collection names (naming errors abort before any write)
//! 2. Register hashed names in the mapping table
//! 3. Insert the raw record (if raw storage is enabled)
//! 4. Fold the value into every active resolution (if aggregation is enabled)
//! 5. Spawn a retention pass every `check_every` writes per collection
//!
//! A failed aggregation is surfaced to the caller; the raw record written
//! before it is kept.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::config::{AppConfig, StoreMode};
use crate::data::traits::StorageAdapter;
use crate::data::types::{BucketKey, CollectionClass, CollectionId, Resolution};

use super::aggregator::Aggregator;
use super::error::IngestError;
use super::event::Event;
use super::naming::{CollectionName, CollectionNamer, NameRegistry};
use super::retention::RetentionEnforcer;

/// Write-path settings of the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSettings {
    pub should_store: StoreMode,
    pub resolutions: Vec<Resolution>,
    pub default_service: String,
    pub default_service_path: String,
}

impl From<&AppConfig> for IngestSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            should_store: config.database.should_store,
            resolutions: config.server.aggregation.clone(),
            default_service: config.database.default_service.clone(),
            default_service_path: config.database.default_service_path.clone(),
        }
    }
}

impl IngestSettings {
    fn validate(&self) -> Result<(), IngestError> {
        if !self.should_store.has_write_path(&self.resolutions) {
            return Err(IngestError::Configuration(format!(
                "no write path enabled (shouldStore '{}' with no resolutions)",
                self.should_store
            )));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.resolutions.iter().find(|r| !seen.insert(**r)) {
            return Err(IngestError::Configuration(format!(
                "resolution '{}' listed more than once",
                dup
            )));
        }
        Ok(())
    }
}

/// What one `ingest` call wrote
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub raw_collection: Option<CollectionId>,
    pub raw_written: bool,
    pub aggregated_collection: Option<CollectionId>,
    /// Buckets updated, in resolution order
    pub buckets: Vec<BucketKey>,
}

/// Process-lifetime ingestion counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub events: u64,
    pub raw_records: u64,
    pub bucket_updates: u64,
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    events: AtomicU64,
    raw_records: AtomicU64,
    bucket_updates: AtomicU64,
    failures: AtomicU64,
}

pub struct IngestCoordinator {
    settings: IngestSettings,
    namer: Arc<dyn CollectionNamer>,
    registry: NameRegistry,
    adapter: Arc<dyn StorageAdapter>,
    aggregator: Aggregator,
    retention: Arc<RetentionEnforcer>,
    counters: Counters,
}

impl IngestCoordinator {
    pub fn new(
        settings: IngestSettings,
        namer: Arc<dyn CollectionNamer>,
        adapter: Arc<dyn StorageAdapter>,
        retention: Arc<RetentionEnforcer>,
    ) -> Result<Self, IngestError> {
        settings.validate()?;
        let registry = NameRegistry::new(Arc::clone(&adapter), namer.is_hashing());
        let aggregator = Aggregator::new(Arc::clone(&adapter));
        Ok(Self {
            settings,
            namer,
            registry,
            adapter,
            aggregator,
            retention,
            counters: Counters::default(),
        })
    }

    /// Replace the aggregator's conflict retry policy
    pub fn with_aggregation_retry(mut self, max_attempts: u32, base_delay_ms: u64) -> Self {
        self.aggregator = self.aggregator.with_retry(max_attempts, base_delay_ms);
        self
    }

    pub fn settings(&self) -> &IngestSettings {
        &self.settings
    }

    pub fn stats(&self) -> IngestStats {
        IngestStats {
            events: self.counters.events.load(Ordering::Relaxed),
            raw_records: self.counters.raw_records.load(Ordering::Relaxed),
            bucket_updates: self.counters.bucket_updates.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    pub async fn ingest(&self, event: &Event) -> Result<IngestReport, IngestError> {
        self.counters.events.fetch_add(1, Ordering::Relaxed);
        let result = self.ingest_inner(event).await;
        if let Err(ref e) = result {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                entity_id = %event.entity_id,
                attr = %event.attr_name,
                error = %e,
                "Ingest failed"
            );
        }
        result
    }

    async fn ingest_inner(&self, event: &Event) -> Result<IngestReport, IngestError> {
        let scope = event.scope(
            &self.settings.default_service,
            &self.settings.default_service_path,
        );
        let store_raw = self.settings.should_store.stores_raw();
        let store_aggregated = self.settings.should_store.stores_aggregated()
            && !self.settings.resolutions.is_empty();

        // Resolve every name first so naming errors abort before any write
        let resolve = |class| {
            self.namer.resolve(
                &scope,
                &event.entity_id,
                &event.entity_type,
                &event.attr_name,
                class,
            )
        };
        let raw_name = store_raw.then(|| resolve(CollectionClass::Raw)).transpose()?;
        let aggregated_name = store_aggregated
            .then(|| resolve(CollectionClass::Aggregated))
            .transpose()?;

        for name in raw_name.iter().chain(aggregated_name.iter()) {
            self.registry.register(name).await?;
        }

        let mut report = IngestReport::default();

        if let Some(name) = raw_name {
            self.adapter.insert(&name.id, &event.raw_record()).await?;
            self.counters.raw_records.fetch_add(1, Ordering::Relaxed);
            report.raw_written = true;
            self.after_write(&name);
            report.raw_collection = Some(name.id);
        }

        if let Some(name) = aggregated_name {
            let buckets = self
                .aggregator
                .apply_all(&name.id, event, &self.settings.resolutions)
                .await?;
            self.counters
                .bucket_updates
                .fetch_add(buckets.len() as u64, Ordering::Relaxed);
            if !buckets.is_empty() {
                self.after_write(&name);
            }
            report.buckets = buckets;
            report.aggregated_collection = Some(name.id);
        }

        tracing::trace!(
            entity_id = %event.entity_id,
            attr = %event.attr_name,
            raw = report.raw_written,
            buckets = report.buckets.len(),
            "Event ingested"
        );
        Ok(report)
    }

    /// Post-write retention hook; runs in the background
    fn after_write(&self, name: &CollectionName) {
        if !self.retention.note_write(&name.id) {
            return;
        }
        let retention = Arc::clone(&self.retention);
        let collection = name.id.clone();
        let class = name.class;
        tokio::spawn(async move {
            retention.enforce(&collection, class).await;
        });
    }

    /// Log the counters every `interval_secs`; `None` when disabled (0)
    pub fn start_proof_of_life_task(
        self: &Arc<Self>,
        interval_secs: u64,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        if interval_secs == 0 {
            tracing::debug!("Proof of life logging disabled");
            return None;
        }

        let coordinator = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            // First tick fires immediately
            interval.tick().await;
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::debug!("Proof of life task shutting down");
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        let stats = coordinator.stats();
                        tracing::info!(
                            events = stats.events,
                            raw_records = stats.raw_records,
                            bucket_updates = stats.bucket_updates,
                            failures = stats.failures,
                            "Running"
                        );
                    }
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::TruncationConfig;
    use crate::data::memory::MemoryStorage;
    use crate::data::types::{AggregatedQuery, RawQuery};
    use crate::domain::error::NamingError;
    use crate::domain::event::AttributeValue;
    use crate::domain::naming::{NamingConfig, build_namer};
    use chrono::{TimeDelta, TimeZone, Utc};

    fn settings(should_store: StoreMode, resolutions: Vec<Resolution>) -> IngestSettings {
        IngestSettings {
            should_store,
            resolutions,
            default_service: "orion".to_string(),
            default_service_path: "/".to_string(),
        }
    }

    fn naming(should_hash: bool, namespace_limit: usize) -> NamingConfig {
        NamingConfig {
            db_prefix: "sth_".to_string(),
            collection_prefix: "sth_".to_string(),
            namespace_limit,
            should_hash,
        }
    }

    fn coordinator_with(
        storage: Arc<MemoryStorage>,
        settings: IngestSettings,
        naming: NamingConfig,
        truncation: TruncationConfig,
    ) -> IngestCoordinator {
        let retention = Arc::new(RetentionEnforcer::new(storage.clone(), &truncation));
        IngestCoordinator::new(settings, build_namer(naming), storage, retention).unwrap()
    }

    fn coordinator(storage: Arc<MemoryStorage>, settings: IngestSettings) -> IngestCoordinator {
        coordinator_with(storage, settings, naming(false, 120), TruncationConfig::default())
    }

    fn event(value: impl Into<AttributeValue>, second: i64) -> Event {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap() + TimeDelta::seconds(second);
        Event::new("Room1", "Room", "temperature", "Number", value, at)
    }

    #[tokio::test]
    async fn test_ingest_both_paths() {
        let storage = Arc::new(MemoryStorage::new());
        let coordinator = coordinator(
            storage.clone(),
            settings(StoreMode::Both, vec![Resolution::Hour, Resolution::Minute]),
        );

        let report = coordinator.ingest(&event(21.5, 0)).await.unwrap();
        assert!(report.raw_written);
        assert_eq!(
            report.raw_collection.as_ref().unwrap().collection,
            "sth_/_Room1_Room_temperature"
        );
        assert_eq!(
            report.aggregated_collection.as_ref().unwrap().collection,
            "sth_/_Room1_Room_temperature.aggr"
        );
        assert_eq!(report.buckets.len(), 2);
        assert_eq!(report.buckets[0].resolution, Resolution::Hour);

        let stats = coordinator.stats();
        assert_eq!(stats.events, 1);
        assert_eq!(stats.raw_records, 1);
        assert_eq!(stats.bucket_updates, 2);
        assert_eq!(stats.failures, 0);
    }

    #[tokio::test]
    async fn test_store_mode_gates_paths() {
        let storage = Arc::new(MemoryStorage::new());
        let raw_only = coordinator(
            storage.clone(),
            settings(StoreMode::OnlyRaw, vec![Resolution::Hour]),
        );
        let report = raw_only.ingest(&event(1.0, 0)).await.unwrap();
        assert!(report.raw_written);
        assert!(report.buckets.is_empty());
        assert!(report.aggregated_collection.is_none());

        let storage = Arc::new(MemoryStorage::new());
        let aggregated_only = coordinator(
            storage.clone(),
            settings(StoreMode::OnlyAggregated, vec![Resolution::Hour]),
        );
        let report = aggregated_only.ingest(&event(1.0, 0)).await.unwrap();
        assert!(!report.raw_written);
        assert_eq!(report.buckets.len(), 1);
        let collections = storage.list_collections().await.unwrap();
        assert!(
            collections
                .iter()
                .all(|c| c.class == CollectionClass::Aggregated)
        );
    }

    #[tokio::test]
    async fn test_no_write_path_is_configuration_error() {
        let storage = Arc::new(MemoryStorage::new());
        let retention = Arc::new(RetentionEnforcer::new(
            storage.clone(),
            &TruncationConfig::default(),
        ));
        let result = IngestCoordinator::new(
            settings(StoreMode::OnlyAggregated, vec![]),
            build_namer(naming(false, 120)),
            storage.clone(),
            retention.clone(),
        );
        assert!(matches!(result, Err(IngestError::Configuration(_))));

        // Raw writes still happen without resolutions
        assert!(
            IngestCoordinator::new(
                settings(StoreMode::Both, vec![]),
                build_namer(naming(false, 120)),
                storage.clone(),
                retention.clone(),
            )
            .is_ok()
        );

        let result = IngestCoordinator::new(
            settings(StoreMode::Both, vec![Resolution::Day, Resolution::Day]),
            build_namer(naming(false, 120)),
            storage,
            retention,
        );
        assert!(matches!(result, Err(IngestError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_naming_error_writes_nothing() {
        let storage = Arc::new(MemoryStorage::new());
        let coordinator = coordinator_with(
            storage.clone(),
            settings(StoreMode::Both, vec![Resolution::Minute]),
            naming(false, 30),
            TruncationConfig::default(),
        );

        let err = coordinator.ingest(&event(1.0, 0)).await.unwrap_err();
        assert!(matches!(
            err,
            IngestError::Naming(NamingError::NamespaceTooLong { .. })
        ));
        assert!(storage.list_collections().await.unwrap().is_empty());
        assert_eq!(coordinator.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_thousand_events_over_an_hour() {
        let storage = Arc::new(MemoryStorage::new());
        let coordinator = Arc::new(coordinator(
            storage.clone(),
            settings(StoreMode::OnlyAggregated, vec![Resolution::Minute]),
        ));

        // 1000 events spread uniformly over [12:00, 13:00), ingested concurrently
        let tasks: Vec<_> = (0..1000)
            .map(|i| {
                let coordinator = Arc::clone(&coordinator);
                tokio::spawn(async move {
                    let second = i * 3600 / 1000;
                    coordinator.ingest(&event(1.0, second)).await.unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let collection = CollectionId::new("sth_orion", "sth_/_Room1_Room_temperature.aggr");
        let records = storage
            .find_aggregated(
                &collection,
                "temperature",
                &AggregatedQuery::new(Resolution::Minute),
            )
            .await
            .unwrap();
        assert_eq!(records.len(), 60);
        assert_eq!(records.iter().map(|r| r.count).sum::<u64>(), 1000);
    }

    #[tokio::test]
    async fn test_hashed_names_registered_once() {
        let storage = Arc::new(MemoryStorage::new());
        let coordinator = coordinator_with(
            storage.clone(),
            settings(StoreMode::OnlyRaw, vec![]),
            naming(true, 80),
            TruncationConfig::default(),
        );
        let mut event = event(1.0, 0);
        event.entity_id = "urn:ngsi-ld:VeryLongEntityIdentifier:0001".to_string();
        let event = event.with_scope("orion", "/building/floor");

        let first = coordinator.ingest(&event).await.unwrap();
        let second = coordinator.ingest(&event).await.unwrap();
        let id = first.raw_collection.unwrap();
        assert_eq!(Some(id.clone()), second.raw_collection);
        assert!(id.collection.len() < 80);

        let mapping = storage
            .find_name_mapping(
                "sth_orion",
                "sth_/building/floor_urn:ngsi-ld:VeryLongEntityIdentifier:0001_Room_temperature",
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(mapping.collection, id.collection);

        let records = storage.find_raw(&id, &RawQuery::default()).await.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_post_write_hook_enforces_max() {
        let storage = Arc::new(MemoryStorage::new());
        let coordinator = coordinator_with(
            storage.clone(),
            settings(StoreMode::OnlyRaw, vec![]),
            naming(false, 120),
            TruncationConfig {
                max: 5,
                check_every: 10,
                interval_secs: 60,
                ..Default::default()
            },
        );

        for i in 0..10 {
            coordinator.ingest(&event(i as f64, i)).await.unwrap();
        }

        // The hook runs on a spawned task
        let collection = CollectionId::new("sth_orion", "sth_/_Room1_Room_temperature");
        let mut remaining = 0;
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            remaining = storage
                .find_raw(&collection, &RawQuery::default())
                .await
                .unwrap()
                .len();
            if remaining == 5 {
                break;
            }
        }
        assert_eq!(remaining, 5);
    }

    #[tokio::test]
    async fn test_proof_of_life_task_lifecycle() {
        let storage = Arc::new(MemoryStorage::new());
        let coordinator = Arc::new(coordinator(
            storage,
            settings(StoreMode::OnlyRaw, vec![]),
        ));
        let (tx, rx) = watch::channel(false);

        assert!(coordinator.start_proof_of_life_task(0, rx.clone()).is_none());

        let handle = coordinator.start_proof_of_life_task(1, rx).unwrap();
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("task should stop on shutdown")
            .unwrap();
    }
}
