//! Engine error types

use thiserror::Error;

use crate::data::error::StorageError;
use crate::data::types::Resolution;

/// Collection naming failures; always raised before any write
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NamingError {
    #[error("Invalid service '{0}': only letters, digits, '_' and '-' are allowed")]
    InvalidService(String),

    #[error("Invalid service path '{0}': must start with '/'")]
    InvalidServicePath(String),

    #[error("Invalid collection name '{0}'")]
    InvalidCollection(String),

    #[error("Namespace '{namespace}' is {len} bytes, limit is {limit}")]
    NamespaceTooLong {
        namespace: String,
        len: usize,
        limit: usize,
    },

    /// Stored mappings disagree with the configured hashing mode
    #[error("Hashing mode mismatch for '{readable}': {reason}")]
    ModeMismatch { readable: String, reason: String },

    /// Generated name already maps to another readable name
    #[error("Collection '{collection}' is already mapped to another name")]
    MappingConflict { collection: String },
}

/// Ingestion failures
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Naming(#[from] NamingError),

    /// A bucket update kept failing; raw writes already made are kept
    #[error("Aggregation of {collection} at {resolution} failed after {attempts} attempts: {source}")]
    AggregationFailure {
        collection: String,
        resolution: Resolution,
        attempts: u32,
        #[source]
        source: StorageError,
    },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[source] StorageError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<StorageError> for IngestError {
    fn from(e: StorageError) -> Self {
        Self::StorageUnavailable(e)
    }
}
