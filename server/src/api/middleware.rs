//! HTTP fallback handling

use axum::body::to_bytes;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use crate::core::constants::{DEFAULT_BODY_LIMIT, HEADER_FIWARE_SERVICE};

/// Bytes of an unmatched request body echoed into the debug log
const MAX_404_BODY_LOG: usize = 4 * 1024;

/// Handle 404 Not Found with logging
pub async fn handle_404(req: Request) -> impl IntoResponse {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return StatusCode::NOT_FOUND;
    }

    let method = req.method().clone();
    let uri = req.uri().clone();
    let service = req
        .headers()
        .get(HEADER_FIWARE_SERVICE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body = match to_bytes(req.into_body(), DEFAULT_BODY_LIMIT).await {
        Ok(bytes) => {
            let shown = &bytes[..bytes.len().min(MAX_404_BODY_LOG)];
            String::from_utf8_lossy(shown).into_owned()
        }
        Err(_) => "<unreadable>".to_string(),
    };

    tracing::debug!(
        status = 404,
        %method,
        %uri,
        service = service.as_deref().unwrap_or_default(),
        body = %body,
        "[404] No route"
    );

    StatusCode::NOT_FOUND
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::body::Body;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let app = Router::new().fallback(handle_404);
        let response = app
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
