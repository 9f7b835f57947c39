//! Shared API types
//!
//! Error responses and query parameter helpers used by every endpoint.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};

use crate::data::StorageError;
use crate::domain::IngestError;
use crate::utils::time::parse_iso_timestamp;

/// Parse an optional timestamp string parameter (RFC 3339 / ISO 8601 format)
pub fn parse_timestamp_param(
    name: &str,
    s: &Option<String>,
) -> Result<Option<DateTime<Utc>>, ApiError> {
    match s {
        Some(ts) => parse_iso_timestamp(ts).map(Some).ok_or_else(|| {
            ApiError::bad_request(
                "INVALID_TIMESTAMP",
                format!("Invalid {} '{}'. Use ISO 8601 format.", name, ts),
            )
        }),
        None => Ok(None),
    }
}

/// Standard API error response
#[derive(Debug)]
pub enum ApiError {
    BadRequest { code: String, message: String },
    ServiceUnavailable { message: String },
    Internal { message: String },
}

impl ApiError {
    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            message: message.into(),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::Naming(naming) => Self::bad_request("INVALID_NAME", naming.to_string()),
            IngestError::Configuration(message) => {
                tracing::error!(error = %message, "Ingestion misconfigured");
                Self::bad_request("CONFIGURATION", message)
            }
            IngestError::StorageUnavailable(source) => Self::from(source),
            e @ IngestError::AggregationFailure { .. } => {
                tracing::error!(error = %e, "Aggregation failed");
                Self::internal("Aggregation failed")
            }
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        if e.is_transient() {
            tracing::warn!(error = %e, "Storage unavailable");
            Self::service_unavailable("Storage temporarily unavailable")
        } else {
            tracing::error!(error = %e, "Storage error");
            Self::internal("Database operation failed")
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, code, message) = match self {
            Self::BadRequest { code, message } => {
                (StatusCode::BAD_REQUEST, "bad_request", code, message)
            }
            Self::ServiceUnavailable { message } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                "SERVICE_UNAVAILABLE".to_string(),
                message,
            ),
            Self::Internal { message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "INTERNAL".to_string(),
                message,
            ),
        };
        (
            status,
            Json(serde_json::json!({
                "error": error_type,
                "code": code,
                "message": message
            })),
        )
            .into_response()
    }
}
