//! History query endpoint
//!
//! `GET /STH/v1/contextEntities/type/{type}/id/{id}/attributes/{attr}`
//!
//! | Mode       | Parameters                                       |
//! |------------|--------------------------------------------------|
//! | raw        | `lastN` or `hLimit` (+ `hOffset`), `dateFrom`, `dateTo` |
//! | aggregated | `aggrMethod`, `aggrPeriod`, `dateFrom`, `dateTo`  |
//!
//! With `filterOutEmpty`, aggregated buckets holding no value for the
//! requested method (e.g. `sum` over textual samples) are left out.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::api::types::{ApiError, parse_timestamp_param};
use crate::core::constants::{HEADER_FIWARE_SERVICE, HEADER_FIWARE_SERVICE_PATH};
use crate::data::types::{
    AggregatedQuery, AggregatedRecord, AggregationMethod, RawQuery, RawRecord, Resolution,
};
use crate::domain::{HistoryLookup, HistoryReader};

/// Largest page accepted through `hLimit` / `lastN`
pub const MAX_HISTORY_LIMIT: usize = 10_000;

#[derive(Clone)]
pub struct HistoryApiState {
    pub history: Arc<HistoryReader>,
    pub filter_out_empty: bool,
}

#[derive(Debug, Deserialize)]
pub struct AttributePath {
    pub entity_type: String,
    pub entity_id: String,
    pub attr_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    pub last_n: Option<usize>,
    pub h_limit: Option<usize>,
    pub h_offset: Option<usize>,
    pub aggr_method: Option<String>,
    pub aggr_period: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub entity_id: String,
    pub entity_type: String,
    pub attr_name: String,
    pub values: Vec<JsonValue>,
}

pub fn routes(history: Arc<HistoryReader>, filter_out_empty: bool) -> Router {
    Router::new()
        .route(
            "/STH/v1/contextEntities/type/{entity_type}/id/{entity_id}/attributes/{attr_name}",
            get(get_history),
        )
        .with_state(HistoryApiState {
            history,
            filter_out_empty,
        })
}

pub async fn get_history(
    State(state): State<HistoryApiState>,
    Path(path): Path<AttributePath>,
    Query(params): Query<HistoryParams>,
    headers: HeaderMap,
) -> Result<Json<HistoryResponse>, ApiError> {
    let date_from = parse_timestamp_param("dateFrom", &params.date_from)?;
    let date_to = parse_timestamp_param("dateTo", &params.date_to)?;

    let lookup = HistoryLookup {
        service: header_value(&headers, HEADER_FIWARE_SERVICE),
        service_path: header_value(&headers, HEADER_FIWARE_SERVICE_PATH),
        entity_id: path.entity_id.clone(),
        entity_type: path.entity_type.clone(),
        attr_name: path.attr_name.clone(),
    };

    let values = match (&params.aggr_method, &params.aggr_period) {
        (Some(method), Some(period)) => {
            let method: AggregationMethod = method
                .parse()
                .map_err(|e: String| ApiError::bad_request("INVALID_AGGR_METHOD", e))?;
            let resolution: Resolution = period
                .parse()
                .map_err(|e: String| ApiError::bad_request("INVALID_AGGR_PERIOD", e))?;
            let query = AggregatedQuery {
                resolution,
                date_from,
                date_to,
            };
            let records = state.history.aggregated(&lookup, &query).await?;
            records
                .iter()
                .filter(|r| !state.filter_out_empty || has_value(r, method))
                .map(|r| aggregated_value(r, method))
                .collect()
        }
        (None, None) => {
            let query = RawQuery {
                date_from,
                date_to,
                ..raw_query(&params)?
            };
            let records = state.history.raw(&lookup, &query).await?;
            records.iter().map(raw_value).collect()
        }
        _ => {
            return Err(ApiError::bad_request(
                "INVALID_QUERY",
                "aggrMethod and aggrPeriod must be given together",
            ));
        }
    };

    Ok(Json(HistoryResponse {
        entity_id: path.entity_id,
        entity_type: path.entity_type,
        attr_name: path.attr_name,
        values,
    }))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Raw reads must be paged: either `lastN` or `hLimit`
fn raw_query(params: &HistoryParams) -> Result<RawQuery, ApiError> {
    let check = |name: &str, n: usize| {
        if n == 0 || n > MAX_HISTORY_LIMIT {
            Err(ApiError::bad_request(
                "INVALID_LIMIT",
                format!("{} must be between 1 and {}", name, MAX_HISTORY_LIMIT),
            ))
        } else {
            Ok(n)
        }
    };
    match (params.last_n, params.h_limit) {
        (Some(last_n), _) => Ok(RawQuery {
            last_n: Some(check("lastN", last_n)?),
            ..Default::default()
        }),
        (None, Some(limit)) => Ok(RawQuery {
            limit: Some(check("hLimit", limit)?),
            offset: params.h_offset.unwrap_or_default(),
            ..Default::default()
        }),
        (None, None) => Err(ApiError::bad_request(
            "INVALID_QUERY",
            "Raw history requires lastN or hLimit",
        )),
    }
}

fn raw_value(record: &RawRecord) -> JsonValue {
    serde_json::json!({
        "recvTime": record.recv_time,
        "attrType": record.attr_type,
        "attrValue": record.attr_value,
    })
}

fn has_value(record: &AggregatedRecord, method: AggregationMethod) -> bool {
    match method {
        AggregationMethod::Occur => !record.occurrences.is_empty(),
        _ => record.numeric.is_some(),
    }
}

fn aggregated_value(record: &AggregatedRecord, method: AggregationMethod) -> JsonValue {
    let value = match method {
        AggregationMethod::Occur => serde_json::json!(record.occurrences),
        AggregationMethod::Max => serde_json::json!(record.numeric.map(|n| n.max)),
        AggregationMethod::Min => serde_json::json!(record.numeric.map(|n| n.min)),
        AggregationMethod::Sum => serde_json::json!(record.numeric.map(|n| n.sum)),
        AggregationMethod::Sum2 => serde_json::json!(record.numeric.map(|n| n.sum2)),
    };
    let mut out = serde_json::json!({
        "origin": record.key.origin,
        "resolution": record.key.resolution,
        "samples": record.count,
    });
    if let Some(obj) = out.as_object_mut() {
        obj.insert(method.as_str().to_string(), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use chrono::{TimeDelta, TimeZone, Utc};
    use tower::ServiceExt;

    use crate::core::config::{StoreMode, TruncationConfig};
    use crate::data::memory::MemoryStorage;
    use crate::domain::{
        Event, IngestCoordinator, IngestSettings, NamingConfig, RetentionEnforcer, build_namer,
    };

    async fn seeded_router() -> Router {
        seeded_router_with(true).await
    }

    async fn seeded_router_with(filter_out_empty: bool) -> Router {
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
            should_hash: false,
        });
        let retention = Arc::new(RetentionEnforcer::new(
            storage.clone(),
            &TruncationConfig::default(),
        ));
        let ingest = IngestCoordinator::new(
            settings.clone(),
            Arc::clone(&namer),
            storage.clone(),
            retention,
        )
        .unwrap();

        let base = Utc.with_ymd_and_hms(2024, 4, 2, 8, 0, 0).unwrap();
        let offline = Event::new(
            "Room1",
            "Room",
            "temperature",
            "Text",
            "n/a",
            base - TimeDelta::hours(2),
        );
        ingest.ingest(&offline).await.unwrap();
        for (i, v) in [3.0, 7.0, 2.0].into_iter().enumerate() {
            let event = Event::new(
                "Room1",
                "Room",
                "temperature",
                "Number",
                v,
                base + TimeDelta::minutes(i as i64),
            );
            ingest.ingest(&event).await.unwrap();
        }

        routes(
            Arc::new(HistoryReader::new(namer, storage, &settings)),
            filter_out_empty,
        )
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, JsonValue) {
        let response = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(JsonValue::Null);
        (status, body)
    }

    const PATH: &str = "/STH/v1/contextEntities/type/Room/id/Room1/attributes/temperature";

    #[tokio::test]
    async fn test_raw_last_n() {
        let (status, body) = get_json(seeded_router().await, &format!("{}?lastN=2", PATH)).await;
        assert_eq!(status, StatusCode::OK);
        let values = body["values"].as_array().unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0]["attrValue"], serde_json::json!(7.0));
        assert_eq!(values[1]["attrValue"], serde_json::json!(2.0));
    }

    #[tokio::test]
    async fn test_raw_paging() {
        let (status, body) =
            get_json(seeded_router().await, &format!("{}?hLimit=1&hOffset=2", PATH)).await;
        assert_eq!(status, StatusCode::OK);
        let values = body["values"].as_array().unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["attrValue"], serde_json::json!(7.0));
    }

    #[tokio::test]
    async fn test_aggregated_sum() {
        let (status, body) = get_json(
            seeded_router().await,
            &format!("{}?aggrMethod=sum&aggrPeriod=hour", PATH),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let values = body["values"].as_array().unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["samples"], serde_json::json!(3));
        assert_eq!(values[0]["sum"], serde_json::json!(12.0));
    }

    #[tokio::test]
    async fn test_empty_buckets_kept_without_filter() {
        let uri = format!("{}?aggrMethod=sum&aggrPeriod=hour", PATH);
        let (_, body) = get_json(seeded_router_with(false).await, &uri).await;
        let values = body["values"].as_array().unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[0]["samples"], serde_json::json!(1));
        assert_eq!(values[0]["sum"], JsonValue::Null);

        // The textual bucket has a value for occur
        let uri = format!("{}?aggrMethod=occur&aggrPeriod=hour", PATH);
        let (_, body) = get_json(seeded_router().await, &uri).await;
        let values = body["values"].as_array().unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["occur"], serde_json::json!({"n/a": 1}));
    }

    #[tokio::test]
    async fn test_rejects_unpaged_raw_and_bad_method() {
        let (status, _) = get_json(seeded_router().await, PATH).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get_json(
            seeded_router().await,
            &format!("{}?aggrMethod=avg&aggrPeriod=hour", PATH),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get_json(
            seeded_router().await,
            &format!("{}?lastN=1&dateFrom=yesterday", PATH),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
