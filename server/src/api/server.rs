//! API server initialization

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use super::routes::flush::{self, FlushState};
use super::routes::health;
use crate::core::CoreApp;
use crate::core::constants::FLUSH_BODY_LIMIT;
use crate::domain::FlushEvent;

/// Build the HTTP router for flush ingestion
pub fn router(events: mpsc::Sender<FlushEvent>) -> Router {
    let flush_routes = Router::new()
        .route("/api/v1/flush", post(flush::ingest))
        .with_state(FlushState { events })
        .layer(DefaultBodyLimit::max(FLUSH_BODY_LIMIT));

    Router::new()
        .route("/api/v1/health", get(health::health))
        .merge(flush_routes)
        .layer(TraceLayer::new_for_http())
}

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
        let addr = SocketAddr::new(
            host.parse()
                .with_context(|| format!("Invalid server host: {host}"))?,
            port,
        );

        let router = router(app.flush_events.clone());

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        tracing::info!(address = %addr, "Listening for flush events");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.wait())
            .await?;

        Ok(app)
    }
}
