//! Attribute update events

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use crate::data::types::{BucketDelta, BucketValue, RawRecord};

/// Value carried by an attribute update
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Number(f64),
    Text(String),
    /// Objects, arrays, booleans and null; stored raw only
    Structured(JsonValue),
}

impl AttributeValue {
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Number(n) => match n.as_f64() {
                Some(v) => Self::Number(v),
                None => Self::Structured(JsonValue::Number(n)),
            },
            JsonValue::String(s) => Self::Text(s),
            other => Self::Structured(other),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Number(v) => serde_json::Number::from_f64(*v)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Self::Text(s) => JsonValue::String(s.clone()),
            Self::Structured(v) => v.clone(),
        }
    }

    /// Contribution to a bucket, `None` for values the aggregator skips.
    ///
    /// Numeric strings aggregate numerically, any other text as a category.
    pub fn bucket_value(&self) -> Option<BucketValue> {
        match self {
            Self::Number(v) if v.is_finite() => Some(BucketValue::Numeric(*v)),
            Self::Number(_) => None,
            Self::Text(s) => match s.trim().parse::<f64>() {
                Ok(v) if v.is_finite() => Some(BucketValue::Numeric(v)),
                _ => Some(BucketValue::Categorical(s.clone())),
            },
            Self::Structured(_) => None,
        }
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// Service and service path an event is stored under
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantScope {
    pub service: String,
    pub service_path: String,
}

/// Timestamped attribute update for one entity. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub service: Option<String>,
    pub service_path: Option<String>,
    pub entity_id: String,
    pub entity_type: String,
    pub attr_name: String,
    pub attr_type: String,
    pub value: AttributeValue,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(
        entity_id: impl Into<String>,
        entity_type: impl Into<String>,
        attr_name: impl Into<String>,
        attr_type: impl Into<String>,
        value: impl Into<AttributeValue>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            service: None,
            service_path: None,
            entity_id: entity_id.into(),
            entity_type: entity_type.into(),
            attr_name: attr_name.into(),
            attr_type: attr_type.into(),
            value: value.into(),
            timestamp,
        }
    }

    pub fn with_scope(mut self, service: impl Into<String>, service_path: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self.service_path = Some(service_path.into());
        self
    }

    /// Scope of the event, filling absent or empty parts from the defaults
    pub fn scope(&self, default_service: &str, default_service_path: &str) -> TenantScope {
        let service = self
            .service
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(default_service);
        let service_path = self
            .service_path
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(default_service_path);
        TenantScope {
            service: service.to_string(),
            service_path: service_path.to_string(),
        }
    }

    pub fn raw_record(&self) -> RawRecord {
        RawRecord {
            recv_time: self.timestamp,
            entity_id: self.entity_id.clone(),
            entity_type: self.entity_type.clone(),
            attr_name: self.attr_name.clone(),
            attr_type: self.attr_type.clone(),
            attr_value: self.value.to_json(),
        }
    }

    pub fn bucket_delta(&self) -> Option<BucketDelta> {
        self.value.bucket_value().map(|value| BucketDelta {
            attr_type: self.attr_type.clone(),
            value,
            at: self.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 8, 30, 0).unwrap()
    }

    #[test]
    fn test_from_json_classifies_values() {
        assert_eq!(
            AttributeValue::from_json(serde_json::json!(21.5)),
            AttributeValue::Number(21.5)
        );
        assert_eq!(
            AttributeValue::from_json(serde_json::json!("on")),
            AttributeValue::Text("on".to_string())
        );
        assert!(matches!(
            AttributeValue::from_json(serde_json::json!({"lat": 1})),
            AttributeValue::Structured(_)
        ));
        assert!(matches!(
            AttributeValue::from_json(serde_json::json!(true)),
            AttributeValue::Structured(_)
        ));
    }

    #[test]
    fn test_bucket_value() {
        assert_eq!(
            AttributeValue::from("12.5").bucket_value(),
            Some(BucketValue::Numeric(12.5))
        );
        assert_eq!(
            AttributeValue::from("open").bucket_value(),
            Some(BucketValue::Categorical("open".to_string()))
        );
        assert_eq!(AttributeValue::Number(f64::NAN).bucket_value(), None);
        assert_eq!(
            AttributeValue::Structured(serde_json::json!([1, 2])).bucket_value(),
            None
        );
    }

    #[test]
    fn test_scope_defaults() {
        let event = Event::new("Room1", "Room", "temperature", "Number", 21.0, at());
        let scope = event.scope("orion", "/");
        assert_eq!(scope.service, "orion");
        assert_eq!(scope.service_path, "/");

        let scoped = event.with_scope("smart", "/building");
        let scope = scoped.scope("orion", "/");
        assert_eq!(scope.service, "smart");
        assert_eq!(scope.service_path, "/building");
    }

    #[test]
    fn test_raw_record_and_delta() {
        let event = Event::new("Room1", "Room", "temperature", "Number", 21.5, at());
        let record = event.raw_record();
        assert_eq!(record.recv_time, at());
        assert_eq!(record.attr_value, serde_json::json!(21.5));

        let delta = event.bucket_delta().unwrap();
        assert_eq!(delta.value, BucketValue::Numeric(21.5));
        assert_eq!(delta.at, at());

        let structured = Event::new(
            "Room1",
            "Room",
            "location",
            "geo:json",
            AttributeValue::Structured(serde_json::json!({"type": "Point"})),
            at(),
        );
        assert!(structured.bucket_delta().is_none());
    }
}
