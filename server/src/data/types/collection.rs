//! Collection identity, bounds and query/delete parameters

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{CollectionClass, Resolution};

/// Fully qualified storage collection: database plus collection name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionId {
    pub database: String,
    pub collection: String,
}

impl CollectionId {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }

    /// Byte length of `database.collection`
    pub fn namespace_len(&self) -> usize {
        self.database.len() + 1 + self.collection.len()
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// A collection known to a backend, with the class of records it holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionEntry {
    pub id: CollectionId,
    pub class: CollectionClass,
}

/// Persisted readable-name to generated-name mapping (insert once, never updated)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NameMapping {
    pub database: String,
    pub readable: String,
    pub collection: String,
    pub created_at: DateTime<Utc>,
}

/// Limits of a bounded raw collection; `None` leaves that dimension unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bounds {
    pub max_bytes: Option<u64>,
    pub max_docs: Option<u64>,
}

impl Bounds {
    pub fn is_unbounded(&self) -> bool {
        self.max_bytes.is_none() && self.max_docs.is_none()
    }

    pub fn exceeded_by(&self, stats: &CollectionStats) -> bool {
        self.max_bytes.is_some_and(|max| stats.bytes > max)
            || self.max_docs.is_some_and(|max| stats.docs > max)
    }
}

/// Storage footprint of one collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionStats {
    pub bytes: u64,
    pub docs: u64,
}

/// Which records `delete_where` removes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletePredicate {
    /// Raw records received before the instant
    RecvTimeBefore(DateTime<Utc>),
    /// Aggregated records whose bucket origin is before the instant
    OriginBefore(DateTime<Utc>),
    /// The N oldest raw records by insertion order
    OldestRaw(u64),
}

/// Raw history query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawQuery {
    /// Return only the newest N records (still ordered oldest first)
    pub last_n: Option<usize>,
    pub offset: usize,
    pub limit: Option<usize>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

impl RawQuery {
    pub fn matches(&self, recv_time: DateTime<Utc>) -> bool {
        self.date_from.is_none_or(|from| recv_time >= from)
            && self.date_to.is_none_or(|to| recv_time <= to)
    }
}

/// Aggregated history query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedQuery {
    pub resolution: Resolution,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

impl AggregatedQuery {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            date_from: None,
            date_to: None,
        }
    }

    pub fn matches(&self, resolution: Resolution, origin: DateTime<Utc>) -> bool {
        resolution == self.resolution
            && self
                .date_from
                .is_none_or(|from| origin >= self.resolution.floor(from))
            && self.date_to.is_none_or(|to| origin <= to)
    }
}
