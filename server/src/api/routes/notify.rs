//! NGSI notification endpoint
//!
//! Accepts `{subscriptionId, data: [{id, type, <attr>: {type, value, metadata}}]}` and
//! turns every attribute of every entity into one ingestion event. Event time comes
//! from the attribute's `TimeInstant` metadata, then the entity's `TimeInstant`
//! attribute, then the receive time.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::api::types::ApiError;
use crate::core::constants::{HEADER_FIWARE_SERVICE, HEADER_FIWARE_SERVICE_PATH, TIME_INSTANT};
use crate::domain::{AttributeValue, Event, IngestCoordinator};
use crate::utils::time::parse_iso_timestamp;

#[derive(Clone)]
pub struct NotifyApiState {
    pub ingest: Arc<IngestCoordinator>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    #[serde(default)]
    pub subscription_id: Option<String>,
    #[serde(default)]
    pub data: Vec<Map<String, JsonValue>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyResponse {
    pub events: usize,
    pub raw_records: usize,
    pub bucket_updates: usize,
}

pub fn routes(ingest: Arc<IngestCoordinator>) -> Router {
    Router::new()
        .route("/notify", post(notify))
        .with_state(NotifyApiState { ingest })
}

pub async fn notify(
    State(state): State<NotifyApiState>,
    headers: HeaderMap,
    Json(payload): Json<NotificationPayload>,
) -> Result<(StatusCode, Json<NotifyResponse>), ApiError> {
    let service = header_value(&headers, HEADER_FIWARE_SERVICE);
    let service_path = header_value(&headers, HEADER_FIWARE_SERVICE_PATH);
    let events = extract_events(&payload, service, service_path, Utc::now())?;

    tracing::debug!(
        subscription_id = payload.subscription_id.as_deref().unwrap_or_default(),
        entities = payload.data.len(),
        events = events.len(),
        "Notification received"
    );

    let mut response = NotifyResponse {
        events: events.len(),
        raw_records: 0,
        bucket_updates: 0,
    };
    for event in &events {
        let report = state.ingest.ingest(event).await?;
        if report.raw_written {
            response.raw_records += 1;
        }
        response.bucket_updates += report.buckets.len();
    }

    Ok((StatusCode::OK, Json(response)))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Flatten a notification into events, one per entity attribute
pub fn extract_events(
    payload: &NotificationPayload,
    service: Option<String>,
    service_path: Option<String>,
    received_at: DateTime<Utc>,
) -> Result<Vec<Event>, ApiError> {
    let mut events = Vec::new();
    for entity in &payload.data {
        let Some(entity_id) = entity.get("id").and_then(JsonValue::as_str) else {
            return Err(ApiError::bad_request(
                "INVALID_NOTIFICATION",
                "Every entity must carry a string 'id'",
            ));
        };
        let entity_type = entity
            .get("type")
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        let entity_time = entity
            .get(TIME_INSTANT)
            .and_then(|attr| attr.get("value"))
            .and_then(JsonValue::as_str)
            .and_then(parse_iso_timestamp);

        for (attr_name, attr) in entity {
            if attr_name == "id" || attr_name == "type" {
                continue;
            }
            let Some(attr) = attr.as_object() else {
                tracing::debug!(entity_id, attr_name, "Skipping attribute without object form");
                continue;
            };
            let attr_type = attr
                .get("type")
                .and_then(JsonValue::as_str)
                .unwrap_or_default();
            let value = attr.get("value").cloned().unwrap_or(JsonValue::Null);
            let timestamp = metadata_time(attr)
                .or(entity_time)
                .unwrap_or(received_at);

            let event = Event {
                service: service.clone(),
                service_path: service_path.clone(),
                entity_id: entity_id.to_string(),
                entity_type: entity_type.to_string(),
                attr_name: attr_name.clone(),
                attr_type: attr_type.to_string(),
                value: AttributeValue::from_json(value),
                timestamp,
            };
            events.push(event);
        }
    }
    Ok(events)
}

fn metadata_time(attr: &Map<String, JsonValue>) -> Option<DateTime<Utc>> {
    attr.get("metadata")?
        .get(TIME_INSTANT)?
        .get("value")?
        .as_str()
        .and_then(parse_iso_timestamp)
}
