//! History reads
//!
//! Resolves the same collection names as ingestion and reads raw or
//! aggregated records back through the Storage Adapter.

use std::sync::Arc;

use crate::data::traits::StorageAdapter;
use crate::data::types::{
    AggregatedQuery, AggregatedRecord, CollectionClass, RawQuery, RawRecord,
};

use super::error::IngestError;
use super::event::TenantScope;
use super::ingest::IngestSettings;
use super::naming::CollectionNamer;

/// Which attribute history to read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryLookup {
    pub service: Option<String>,
    pub service_path: Option<String>,
    pub entity_id: String,
    pub entity_type: String,
    pub attr_name: String,
}

pub struct HistoryReader {
    namer: Arc<dyn CollectionNamer>,
    adapter: Arc<dyn StorageAdapter>,
    default_service: String,
    default_service_path: String,
}

impl HistoryReader {
    pub fn new(
        namer: Arc<dyn CollectionNamer>,
        adapter: Arc<dyn StorageAdapter>,
        settings: &IngestSettings,
    ) -> Self {
        Self {
            namer,
            adapter,
            default_service: settings.default_service.clone(),
            default_service_path: settings.default_service_path.clone(),
        }
    }

    fn scope(&self, lookup: &HistoryLookup) -> TenantScope {
        let pick = |value: &Option<String>, default: &str| {
            value
                .as_deref()
                .filter(|s| !s.is_empty())
                .unwrap_or(default)
                .to_string()
        };
        TenantScope {
            service: pick(&lookup.service, &self.default_service),
            service_path: pick(&lookup.service_path, &self.default_service_path),
        }
    }

    pub async fn raw(
        &self,
        lookup: &HistoryLookup,
        query: &RawQuery,
    ) -> Result<Vec<RawRecord>, IngestError> {
        let name = self.namer.resolve(
            &self.scope(lookup),
            &lookup.entity_id,
            &lookup.entity_type,
            &lookup.attr_name,
            CollectionClass::Raw,
        )?;
        Ok(self.adapter.find_raw(&name.id, query).await?)
    }

    pub async fn aggregated(
        &self,
        lookup: &HistoryLookup,
        query: &AggregatedQuery,
    ) -> Result<Vec<AggregatedRecord>, IngestError> {
        let name = self.namer.resolve(
            &self.scope(lookup),
            &lookup.entity_id,
            &lookup.entity_type,
            &lookup.attr_name,
            CollectionClass::Aggregated,
        )?;
        Ok(self
            .adapter
            .find_aggregated(&name.id, &lookup.attr_name, query)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{StoreMode, TruncationConfig};
    use crate::data::memory::MemoryStorage;
    use crate::data::types::Resolution;
    use crate::domain::event::Event;
    use crate::domain::ingest::IngestCoordinator;
    use crate::domain::naming::{NamingConfig, build_namer};
    use crate::domain::retention::RetentionEnforcer;
    use chrono::{TimeDelta, TimeZone, Utc};

    #[tokio::test]
    async fn test_reads_back_what_was_ingested() {
        let storage = Arc::new(MemoryStorage::new());
        let settings = IngestSettings {
            should_store: StoreMode::Both,
            resolutions: vec![Resolution::Hour],
            default_service: "orion".to_string(),
            default_service_path: "/".to_string(),
        };
        let namer = build_namer(NamingConfig {
            db_prefix: "sth_".to_string(),
            collection_prefix: "sth_".to_string(),
            namespace_limit: 120,
            should_hash: true,
        });
        let retention = Arc::new(RetentionEnforcer::new(
            storage.clone(),
            &TruncationConfig::default(),
        ));
        let coordinator = IngestCoordinator::new(
            settings.clone(),
            Arc::clone(&namer),
            storage.clone(),
            retention,
        )
        .unwrap();

        let base = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
        for i in 0..4 {
            let event = Event::new(
                "Lamp1",
                "Lamp",
                "state",
                "Text",
                if i % 2 == 0 { "on" } else { "off" },
                base + TimeDelta::minutes(i),
            )
            .with_scope("smart", "/city");
            coordinator.ingest(&event).await.unwrap();
        }

        let reader = HistoryReader::new(namer, storage, &settings);
        let lookup = HistoryLookup {
            service: Some("smart".to_string()),
            service_path: Some("/city".to_string()),
            entity_id: "Lamp1".to_string(),
            entity_type: "Lamp".to_string(),
            attr_name: "state".to_string(),
        };

        let raw = reader
            .raw(
                &lookup,
                &RawQuery {
                    last_n: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(raw.len(), 2);
        assert_eq!(raw[1].attr_value, serde_json::json!("off"));

        let buckets = reader
            .aggregated(&lookup, &AggregatedQuery::new(Resolution::Hour))
            .await
            .unwrap();
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].occurrences.get("on"), Some(&2));
        assert_eq!(buckets[0].occurrences.get("off"), Some(&2));

        // Default scope has no history for this entity
        let unscoped = HistoryLookup {
            service: None,
            service_path: None,
            ..lookup
        };
        assert!(
            reader
                .raw(&unscoped, &RawQuery::default())
                .await
                .unwrap()
                .is_empty()
        );
    }
}
