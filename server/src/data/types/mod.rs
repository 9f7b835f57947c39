//! Shared data types for all storage backends
//!
//! These types are used by the engine and by every Storage Adapter
//! implementation to keep a consistent data model.

mod collection;
mod enums;
mod records;

pub use collection::{
    AggregatedQuery, Bounds, CollectionEntry, CollectionId, CollectionStats, DeletePredicate,
    NameMapping, RawQuery,
};
pub use enums::{AggregationMethod, CollectionClass, Resolution};
pub use records::{
    AggregatedRecord, BucketDelta, BucketKey, BucketValue, NumericStats, RawRecord,
};
