//! API server initialization

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::compression::CompressionLayer;

use super::middleware;
use super::routes::{health, history, notify};
use crate::core::CoreApp;
use crate::core::constants::DEFAULT_BODY_LIMIT;
use crate::domain::{HistoryReader, IngestCoordinator};

pub struct ApiServer {
    app: CoreApp,
}

impl ApiServer {
    pub fn new(app: CoreApp) -> Self {
        Self { app }
    }

    /// Returns CoreApp for graceful shutdown
    pub async fn start(self) -> Result<CoreApp> {
        let Self { app } = self;

        let shutdown = app.shutdown.clone();

        let host = app.config.server.host.clone();
        let port = app.config.server.port;
        let addr = SocketAddr::new(host.parse()?, port);

        let router = router(
            app.ingest.clone(),
            app.history.clone(),
            app.config.server.filter_out_empty,
        );

        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "Listening for notifications");
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown.wait())
        .await?;

        Ok(app)
    }
}

/// Full HTTP surface: notification intake, history queries and probes
pub fn router(
    ingest: Arc<IngestCoordinator>,
    history: Arc<HistoryReader>,
    filter_out_empty: bool,
) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/version", get(health::version))
        .merge(notify::routes(ingest))
        .merge(history::routes(history, filter_out_empty))
        .fallback(middleware::handle_404)
        .layer(CompressionLayer::new())
        .layer(DefaultBodyLimit::max(DEFAULT_BODY_LIMIT))
}
