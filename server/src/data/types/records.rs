//! Raw and aggregated record models
//!
//! `AggregatedRecord::fold` is the reference incremental rule; backends that
//! cannot call it (SQL upserts) must produce the same result.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::enums::Resolution;

// ============================================================================
// RAW RECORDS
// ============================================================================

/// One persisted copy of an ingested event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    pub recv_time: DateTime<Utc>,
    pub entity_id: String,
    pub entity_type: String,
    pub attr_name: String,
    pub attr_type: String,
    pub attr_value: JsonValue,
}

impl RawRecord {
    /// Approximate storage footprint, used by size-bounded collections.
    pub fn size_bytes(&self) -> u64 {
        serde_json::to_vec(self)
            .map(|v| v.len() as u64)
            .unwrap_or_default()
    }
}

// ============================================================================
// BUCKETS
// ============================================================================

/// Identity of an aggregated record inside its collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketKey {
    pub resolution: Resolution,
    pub origin: DateTime<Utc>,
    pub attr_name: String,
}

impl BucketKey {
    pub fn new(resolution: Resolution, at: DateTime<Utc>, attr_name: impl Into<String>) -> Self {
        Self {
            resolution,
            origin: resolution.floor(at),
            attr_name: attr_name.into(),
        }
    }
}

/// Value contributed by a single event to a bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "value")]
pub enum BucketValue {
    Numeric(f64),
    Categorical(String),
}

impl BucketValue {
    /// Textual form stored as `lastValue`
    pub fn display(&self) -> String {
        match self {
            Self::Numeric(v) => v.to_string(),
            Self::Categorical(s) => s.clone(),
        }
    }
}

/// Increment applied by one event to one bucket
#[derive(Debug, Clone, PartialEq)]
pub struct BucketDelta {
    pub attr_type: String,
    pub value: BucketValue,
    pub at: DateTime<Utc>,
}

// ============================================================================
// AGGREGATED RECORDS
// ============================================================================

/// Running numeric summary of a bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericStats {
    pub count: u64,
    pub sum: f64,
    pub sum2: f64,
    pub min: f64,
    pub max: f64,
}

impl NumericStats {
    pub fn first(value: f64) -> Self {
        Self {
            count: 1,
            sum: value,
            sum2: value * value,
            min: value,
            max: value,
        }
    }

    pub fn observe(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum2 += value * value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Running statistics document for one bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedRecord {
    #[serde(flatten)]
    pub key: BucketKey,
    pub attr_type: String,
    /// Number of events folded into this record
    pub count: u64,
    pub numeric: Option<NumericStats>,
    pub occurrences: BTreeMap<String, u64>,
    pub first_at: DateTime<Utc>,
    pub last_at: DateTime<Utc>,
    pub last_value: String,
}

impl AggregatedRecord {
    /// Create the record for the first event of a bucket
    pub fn new(key: BucketKey, delta: &BucketDelta) -> Self {
        let mut record = Self {
            key,
            attr_type: delta.attr_type.clone(),
            count: 0,
            numeric: None,
            occurrences: BTreeMap::new(),
            first_at: delta.at,
            last_at: delta.at,
            last_value: delta.value.display(),
        };
        record.fold(delta);
        record
    }

    /// Fold one more event into the record.
    ///
    /// Order independent for everything but ties on `last_at`, where the
    /// later fold wins.
    pub fn fold(&mut self, delta: &BucketDelta) {
        self.count += 1;
        match &delta.value {
            BucketValue::Numeric(v) => match self.numeric.as_mut() {
                Some(stats) => stats.observe(*v),
                None => self.numeric = Some(NumericStats::first(*v)),
            },
            BucketValue::Categorical(s) => {
                *self.occurrences.entry(s.clone()).or_default() += 1;
            }
        }
        if delta.at < self.first_at {
            self.first_at = delta.at;
        }
        if delta.at >= self.last_at {
            self.last_at = delta.at;
            self.last_value = delta.value.display();
        }
    }

    /// Approximate storage footprint
    pub fn size_bytes(&self) -> u64 {
        serde_json::to_vec(self)
            .map(|v| v.len() as u64)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn delta(value: BucketValue, second: u32) -> BucketDelta {
        BucketDelta {
            attr_type: "Number".to_string(),
            value,
            at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, second).unwrap(),
        }
    }

    fn key() -> BucketKey {
        BucketKey::new(
            Resolution::Hour,
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 0).unwrap(),
            "temperature",
        )
    }

    #[test]
    fn test_bucket_key_floors_origin() {
        assert_eq!(
            key().origin,
            Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_fold_numeric_values() {
        let mut record = AggregatedRecord::new(key(), &delta(BucketValue::Numeric(3.0), 1));
        record.fold(&delta(BucketValue::Numeric(7.0), 2));
        record.fold(&delta(BucketValue::Numeric(2.0), 3));

        let stats = record.numeric.unwrap();
        assert_eq!(record.count, 3);
        assert_eq!(stats.count, 3);
        assert_eq!(stats.sum, 12.0);
        assert_eq!(stats.sum2, 62.0);
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 7.0);
        assert_eq!(stats.mean(), 4.0);
        assert!(stats.sum2 >= stats.sum * stats.sum / stats.count as f64);
        assert_eq!(record.last_value, "2");
    }

    #[test]
    fn test_fold_categorical_values() {
        let mut record = AggregatedRecord::new(
            key(),
            &delta(BucketValue::Categorical("open".to_string()), 1),
        );
        record.fold(&delta(BucketValue::Categorical("closed".to_string()), 2));
        record.fold(&delta(BucketValue::Categorical("open".to_string()), 3));

        assert_eq!(record.count, 3);
        assert!(record.numeric.is_none());
        assert_eq!(record.occurrences.get("open"), Some(&2));
        assert_eq!(record.occurrences.get("closed"), Some(&1));
    }

    #[test]
    fn test_fold_out_of_order_keeps_latest_value() {
        let mut record = AggregatedRecord::new(key(), &delta(BucketValue::Numeric(5.0), 40));
        record.fold(&delta(BucketValue::Numeric(1.0), 10));

        assert_eq!(record.last_value, "5");
        assert_eq!(record.first_at, delta(BucketValue::Numeric(1.0), 10).at);
        assert_eq!(record.last_at, delta(BucketValue::Numeric(5.0), 40).at);
    }

    #[test]
    fn test_raw_record_size_is_positive() {
        let record = RawRecord {
            recv_time: Utc::now(),
            entity_id: "Room1".to_string(),
            entity_type: "Room".to_string(),
            attr_name: "temperature".to_string(),
            attr_type: "Number".to_string(),
            attr_value: serde_json::json!(21.5),
        };
        assert!(record.size_bytes() > 50);
    }
}
