//! Collection naming
//!
//! Maps (service, service path, entity, attribute, class) to the storage
//! collection holding its history. Two strategies share [`CollectionNamer`]:
//!
//! - [`ReadableNamer`] always uses the readable name and rejects names whose
//!   `database.collection` namespace exceeds the limit.
//! - [`HashedNamer`] falls back to a fixed-length SHA-256 name when the
//!   readable one does not fit, recording the pair in the mapping table.
//!
//! [`NameRegistry`] persists those mappings once per readable name and
//! detects data written under the other hashing mode.

use std::sync::{Arc, OnceLock};

use chrono::Utc;
use dashmap::DashSet;
use regex::Regex;

use crate::core::config::DatabaseConfig;
use crate::core::constants::AGGREGATED_COLLECTION_SUFFIX;
use crate::data::error::StorageError;
use crate::data::traits::StorageAdapter;
use crate::data::types::{CollectionClass, CollectionId, NameMapping};
use crate::utils::crypto::sha256_hex;

use super::error::{IngestError, NamingError};
use super::event::TenantScope;

/// Naming settings taken from the database configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingConfig {
    pub db_prefix: String,
    pub collection_prefix: String,
    pub namespace_limit: usize,
    pub should_hash: bool,
}

impl From<&DatabaseConfig> for NamingConfig {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            db_prefix: config.prefix.clone(),
            collection_prefix: config.collection_prefix.clone(),
            namespace_limit: config.namespace_limit,
            should_hash: config.should_hash,
        }
    }
}

/// Resolved collection for one (scope, entity, attribute, class)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionName {
    pub id: CollectionId,
    /// Readable collection name, equal to `id.collection` unless hashed
    pub readable: String,
    pub class: CollectionClass,
    pub hashed: bool,
}

pub trait CollectionNamer: Send + Sync {
    fn resolve(
        &self,
        scope: &TenantScope,
        entity_id: &str,
        entity_type: &str,
        attr_name: &str,
        class: CollectionClass,
    ) -> Result<CollectionName, NamingError>;

    /// Whether over-long names are replaced by hashes
    fn is_hashing(&self) -> bool;
}

/// Build the namer selected by `should_hash`
pub fn build_namer(config: NamingConfig) -> Arc<dyn CollectionNamer> {
    if config.should_hash {
        Arc::new(HashedNamer::new(config))
    } else {
        Arc::new(ReadableNamer::new(config))
    }
}

fn database_name_regex() -> &'static Regex {
    static RE_DATABASE: OnceLock<Regex> = OnceLock::new();
    RE_DATABASE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("Invalid regex"))
}

fn database_name(config: &NamingConfig, service: &str) -> Result<String, NamingError> {
    let database = format!("{}{}", config.db_prefix, service);
    if service.is_empty() || !database_name_regex().is_match(&database) {
        return Err(NamingError::InvalidService(service.to_string()));
    }
    Ok(database)
}

fn class_suffix(class: CollectionClass) -> &'static str {
    match class {
        CollectionClass::Raw => "",
        CollectionClass::Aggregated => AGGREGATED_COLLECTION_SUFFIX,
    }
}

/// Backslash-escape the separator `_`, the class suffix dot and `\` itself,
/// so distinct components never join into the same name.
fn escape_component(out: &mut String, component: &str) {
    for c in component.chars() {
        if matches!(c, '_' | '.' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
}

/// `prefix + servicePath + "_" + id [+ "_" + type] + "_" + attr`, without class suffix.
/// Components are escaped, so the unescaped separators also tell whether the
/// type is present.
fn readable_base(
    config: &NamingConfig,
    scope: &TenantScope,
    entity_id: &str,
    entity_type: &str,
    attr_name: &str,
) -> Result<String, NamingError> {
    if !scope.service_path.starts_with('/') {
        return Err(NamingError::InvalidServicePath(scope.service_path.clone()));
    }

    let mut name = config.collection_prefix.clone();
    escape_component(&mut name, &scope.service_path);
    name.push('_');
    escape_component(&mut name, entity_id);
    if !entity_type.is_empty() {
        name.push('_');
        escape_component(&mut name, entity_type);
    }
    name.push('_');
    escape_component(&mut name, attr_name);

    if entity_id.is_empty() || attr_name.is_empty() || name.contains('$') || name.contains('\0')
    {
        return Err(NamingError::InvalidCollection(name));
    }
    Ok(name)
}

fn check_namespace(id: &CollectionId, limit: usize) -> Result<(), NamingError> {
    let len = id.namespace_len();
    if len > limit {
        return Err(NamingError::NamespaceTooLong {
            namespace: id.to_string(),
            len,
            limit,
        });
    }
    Ok(())
}

// ============================================================================
// READABLE NAMER
// ============================================================================

pub struct ReadableNamer {
    config: NamingConfig,
}

impl ReadableNamer {
    pub fn new(config: NamingConfig) -> Self {
        Self { config }
    }
}

impl CollectionNamer for ReadableNamer {
    fn resolve(
        &self,
        scope: &TenantScope,
        entity_id: &str,
        entity_type: &str,
        attr_name: &str,
        class: CollectionClass,
    ) -> Result<CollectionName, NamingError> {
        let database = database_name(&self.config, &scope.service)?;
        let readable = readable_base(&self.config, scope, entity_id, entity_type, attr_name)?
            + class_suffix(class);
        let id = CollectionId::new(database, readable.clone());
        check_namespace(&id, self.config.namespace_limit)?;

        Ok(CollectionName {
            id,
            readable,
            class,
            hashed: false,
        })
    }

    fn is_hashing(&self) -> bool {
        false
    }
}

// ============================================================================
// HASHED NAMER
// ============================================================================

pub struct HashedNamer {
    config: NamingConfig,
}

impl HashedNamer {
    pub fn new(config: NamingConfig) -> Self {
        Self { config }
    }
}

impl CollectionNamer for HashedNamer {
    fn resolve(
        &self,
        scope: &TenantScope,
        entity_id: &str,
        entity_type: &str,
        attr_name: &str,
        class: CollectionClass,
    ) -> Result<CollectionName, NamingError> {
        let database = database_name(&self.config, &scope.service)?;
        let base = readable_base(&self.config, scope, entity_id, entity_type, attr_name)?;
        let suffix = class_suffix(class);
        let readable = format!("{}{}", base, suffix);

        let id = CollectionId::new(database.clone(), readable.clone());
        if id.namespace_len() <= self.config.namespace_limit {
            return Ok(CollectionName {
                id,
                readable,
                class,
                hashed: false,
            });
        }

        // Raw and aggregated collections of one attribute share the digest
        let hashed = format!(
            "{}{}{}",
            self.config.collection_prefix,
            sha256_hex(&base),
            suffix
        );
        let id = CollectionId::new(database, hashed);
        check_namespace(&id, self.config.namespace_limit)?;

        Ok(CollectionName {
            id,
            readable,
            class,
            hashed: true,
        })
    }

    fn is_hashing(&self) -> bool {
        true
    }
}

// ============================================================================
// NAME REGISTRY
// ============================================================================

/// Records hashed names in the mapping table, once per readable name
pub struct NameRegistry {
    adapter: Arc<dyn StorageAdapter>,
    hashing: bool,
    /// (database, readable) pairs already checked by this process
    known: DashSet<(String, String)>,
}

impl NameRegistry {
    pub fn new(adapter: Arc<dyn StorageAdapter>, hashing: bool) -> Self {
        Self {
            adapter,
            hashing,
            known: DashSet::new(),
        }
    }

    /// Persist the mapping for a hashed name and verify that stored mappings
    /// agree with the configured hashing mode.
    pub async fn register(&self, name: &CollectionName) -> Result<(), IngestError> {
        let key = (name.id.database.clone(), name.readable.clone());
        if self.known.contains(&key) {
            return Ok(());
        }

        if name.hashed {
            let mapping = NameMapping {
                database: name.id.database.clone(),
                readable: name.readable.clone(),
                collection: name.id.collection.clone(),
                created_at: Utc::now(),
            };
            let stored = match self.adapter.insert_name_mapping(&mapping).await {
                Ok(stored) => stored,
                Err(StorageError::Conflict { .. }) => {
                    return Err(NamingError::MappingConflict {
                        collection: name.id.collection.clone(),
                    }
                    .into());
                }
                Err(e) => return Err(e.into()),
            };
            if stored.collection != name.id.collection {
                return Err(NamingError::ModeMismatch {
                    readable: name.readable.clone(),
                    reason: format!("already stored as '{}'", stored.collection),
                }
                .into());
            }
            tracing::debug!(
                readable = %name.readable,
                collection = %name.id,
                "Registered hashed collection name"
            );
        } else if let Some(stored) = self
            .adapter
            .find_name_mapping(&name.id.database, &name.readable)
            .await?
            && stored.collection != name.id.collection
        {
            let reason = if self.hashing {
                format!("mapped to '{}'", stored.collection)
            } else {
                format!(
                    "hashed to '{}' but hashing is disabled",
                    stored.collection
                )
            };
            return Err(NamingError::ModeMismatch {
                readable: name.readable.clone(),
                reason,
            }
            .into());
        }

        self.known.insert(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::memory::MemoryStorage;
    use std::collections::HashSet;

    fn config(should_hash: bool, namespace_limit: usize) -> NamingConfig {
        NamingConfig {
            db_prefix: "sth_".to_string(),
            collection_prefix: "sth_".to_string(),
            namespace_limit,
            should_hash,
        }
    }

    fn scope(service_path: &str) -> TenantScope {
        TenantScope {
            service: "orion".to_string(),
            service_path: service_path.to_string(),
        }
    }

    #[test]
    fn test_readable_name() {
        let namer = ReadableNamer::new(config(false, 120));
        let name = namer
            .resolve(&scope("/"), "Room1", "Room", "temperature", CollectionClass::Raw)
            .unwrap();
        assert_eq!(name.id.database, "sth_orion");
        assert_eq!(name.id.collection, "sth_/_Room1_Room_temperature");
        assert!(!name.hashed);

        let aggr = namer
            .resolve(
                &scope("/"),
                "Room1",
                "Room",
                "temperature",
                CollectionClass::Aggregated,
            )
            .unwrap();
        assert_eq!(aggr.id.collection, "sth_/_Room1_Room_temperature.aggr");
    }

    #[test]
    fn test_empty_entity_type_is_omitted() {
        let namer = ReadableNamer::new(config(false, 120));
        let name = namer
            .resolve(&scope("/a"), "Car1", "", "speed", CollectionClass::Raw)
            .unwrap();
        assert_eq!(name.id.collection, "sth_/a_Car1_speed");
    }

    #[test]
    fn test_separator_in_components_does_not_collide() {
        let readable = ReadableNamer::new(config(false, 120));
        let resolve = |id: &str, ty: &str, attr: &str, class| {
            readable
                .resolve(&scope("/building/floor"), id, ty, attr, class)
                .unwrap()
                .id
        };

        let a = resolve("Room_1", "", "t", CollectionClass::Raw);
        let b = resolve("Room", "1", "t", CollectionClass::Raw);
        assert_ne!(a, b);
        assert_eq!(a.collection, "sth_/building/floor_Room\\_1_t");
        assert_eq!(b.collection, "sth_/building/floor_Room_1_t");

        // An attribute ending in the class suffix stays raw
        assert_ne!(
            resolve("Room", "1", "t.aggr", CollectionClass::Raw),
            resolve("Room", "1", "t", CollectionClass::Aggregated)
        );
        assert_ne!(
            resolve("A\\", "B", "c", CollectionClass::Raw),
            resolve("A", "\\B", "c", CollectionClass::Raw)
        );

        let hashed = HashedNamer::new(config(true, 85));
        let a = hashed
            .resolve(
                &scope("/building/floor"),
                "Sensor_1_with_a_long_identifier",
                "Temperature",
                "value",
                CollectionClass::Aggregated,
            )
            .unwrap();
        let b = hashed
            .resolve(
                &scope("/building/floor"),
                "Sensor",
                "1_with_a_long_identifier_Temperature",
                "value",
                CollectionClass::Aggregated,
            )
            .unwrap();
        assert!(a.hashed && b.hashed);
        assert_ne!(a.readable, b.readable);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_readable_namer_rejects_long_namespace() {
        let namer = ReadableNamer::new(config(false, 40));
        let err = namer
            .resolve(
                &scope("/building/floor/room"),
                "Sensor-000001",
                "TemperatureSensor",
                "temperature",
                CollectionClass::Raw,
            )
            .unwrap_err();
        assert!(matches!(err, NamingError::NamespaceTooLong { limit: 40, .. }));
    }

    #[test]
    fn test_invalid_inputs() {
        let namer = ReadableNamer::new(config(false, 120));
        let bad_service = TenantScope {
            service: "my.service".to_string(),
            service_path: "/".to_string(),
        };
        assert!(matches!(
            namer.resolve(&bad_service, "R", "T", "a", CollectionClass::Raw),
            Err(NamingError::InvalidService(_))
        ));
        assert!(matches!(
            namer.resolve(&scope("rooms"), "R", "T", "a", CollectionClass::Raw),
            Err(NamingError::InvalidServicePath(_))
        ));
        assert!(matches!(
            namer.resolve(&scope("/"), "R$1", "T", "a", CollectionClass::Raw),
            Err(NamingError::InvalidCollection(_))
        ));
    }

    #[test]
    fn test_hashed_namer_keeps_short_names_readable() {
        let namer = HashedNamer::new(config(true, 120));
        let name = namer
            .resolve(&scope("/"), "Room1", "Room", "temperature", CollectionClass::Raw)
            .unwrap();
        assert!(!name.hashed);
        assert_eq!(name.id.collection, "sth_/_Room1_Room_temperature");
    }

    #[test]
    fn test_hashed_names_fit_and_are_distinct() {
        let namer = HashedNamer::new(config(true, 90));
        let mut seen = HashSet::new();
        for i in 0..50 {
            let entity = format!("urn:ngsi-ld:VeryLongEntityIdentifier:{:04}", i);
            let name = namer
                .resolve(
                    &scope("/building/floor"),
                    &entity,
                    "Sensor",
                    "temperature",
                    CollectionClass::Aggregated,
                )
                .unwrap();
            assert!(name.hashed);
            assert!(name.id.namespace_len() <= 90);
            assert!(name.id.collection.ends_with(".aggr"));
            assert!(seen.insert(name.id.collection));
        }
    }

    #[test]
    fn test_hashed_namer_errors_when_hash_does_not_fit() {
        let namer = HashedNamer::new(config(true, 30));
        let err = namer
            .resolve(
                &scope("/building/floor"),
                "urn:ngsi-ld:Entity",
                "Sensor",
                "temperature",
                CollectionClass::Raw,
            )
            .unwrap_err();
        assert!(matches!(err, NamingError::NamespaceTooLong { .. }));
    }

    #[test]
    fn test_build_namer_selects_variant() {
        assert!(build_namer(config(true, 120)).is_hashing());
        assert!(!build_namer(config(false, 120)).is_hashing());
    }

    #[tokio::test]
    async fn test_registry_one_mapping_per_readable() {
        let storage = Arc::new(MemoryStorage::new());
        let registry = NameRegistry::new(storage.clone(), true);
        let namer = HashedNamer::new(config(true, 80));
        let name = namer
            .resolve(
                &scope("/building/floor"),
                "urn:ngsi-ld:VeryLongEntityIdentifier:0001",
                "Sensor",
                "temperature",
                CollectionClass::Raw,
            )
            .unwrap();
        assert!(name.hashed);

        registry.register(&name).await.unwrap();
        registry.register(&name).await.unwrap();

        // A second process registering the same name sees the stored mapping
        let other = NameRegistry::new(storage.clone(), true);
        other.register(&name).await.unwrap();

        let stored = storage
            .find_name_mapping(&name.id.database, &name.readable)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.collection, name.id.collection);
    }

    #[tokio::test]
    async fn test_registry_detects_mode_mismatch() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .insert_name_mapping(&NameMapping {
                database: "sth_orion".to_string(),
                readable: "sth_/_Room1_Room_temperature".to_string(),
                collection: format!("sth_{}", sha256_hex("sth_/_Room1_Room_temperature")),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let registry = NameRegistry::new(storage, false);
        let namer = ReadableNamer::new(config(false, 120));
        let name = namer
            .resolve(&scope("/"), "Room1", "Room", "temperature", CollectionClass::Raw)
            .unwrap();

        let err = registry.register(&name).await.unwrap_err();
        assert!(matches!(
            err,
            IngestError::Naming(NamingError::ModeMismatch { .. })
        ));
    }
}
