//! Flush ingestion endpoint

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::core::constants::BACKPRESSURE_RETRY_AFTER_SECS;
use crate::domain::FlushEvent;

#[derive(Clone)]
pub struct FlushState {
    pub events: mpsc::Sender<FlushEvent>,
}

/// POST /api/v1/flush
///
/// Queues the event and answers `202 Accepted` without waiting for storage.
/// A full or closed queue answers `503` with `Retry-After`.
pub async fn ingest(State(state): State<FlushState>, Json(event): Json<FlushEvent>) -> Response {
    let timestamp = event.timestamp;
    let metrics = event.metrics.len();

    match state.events.try_send(event) {
        Ok(()) => {
            tracing::trace!(timestamp, metrics, "Flush queued");
            StatusCode::ACCEPTED.into_response()
        }
        Err(e) => {
            let reason = match e {
                TrySendError::Full(_) => "queue full",
                TrySendError::Closed(_) => "shutting down",
            };
            tracing::warn!(timestamp, metrics, reason, "Failed to queue flush");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [(
                    HeaderName::from_static("retry-after"),
                    BACKPRESSURE_RETRY_AFTER_SECS.to_string(),
                )],
            )
                .into_response()
        }
    }
}
