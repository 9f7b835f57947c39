//! SQLite repositories
//!
//! Types (RawRecord, AggregatedRecord, etc.) should be imported from `crate::data::types`.

pub mod aggregated;
pub mod mapping;
pub mod raw;
pub mod retention;

pub use aggregated::{find_buckets, upsert_increment};
pub use mapping::{find_mapping, insert_mapping};
pub use raw::{find_records, insert_record};
pub use retention::{collection_size, delete_where, list_collections, upsert_bounds};
