//! History engine
//!
//! - `event` - attribute update events and their values
//! - `naming` - collection naming (readable or hashed) and the mapping registry
//! - `aggregator` - atomic bucket updates per resolution
//! - `retention` - TTL, size and count truncation
//! - `ingest` - per-event coordinator wiring the above together
//! - `history` - raw and aggregated reads
//! - `error` - naming and ingestion errors

pub mod aggregator;
pub mod error;
pub mod event;
pub mod history;
pub mod ingest;
pub mod naming;
pub mod retention;

pub use aggregator::Aggregator;
pub use error::{IngestError, NamingError};
pub use event::{AttributeValue, Event, TenantScope};
pub use history::{HistoryLookup, HistoryReader};
pub use ingest::{IngestCoordinator, IngestReport, IngestSettings, IngestStats};
pub use naming::{CollectionNamer, HashedNamer, NamingConfig, ReadableNamer, build_namer};
pub use retention::{RetentionAction, RetentionEnforcer, RetentionOutcome, RetentionPolicy};
