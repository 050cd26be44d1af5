//! Ingestion service: validate event payloads and queue them.
//!
//! # Endpoints
//!
//! - `POST /event`: validate, enqueue one `process-event` job, acknowledge
//! - `GET /health`, `GET /ready`, `GET /api-docs`
//!
//! A 200 response means the job is queued, not that the event is stored.
//! Nothing is buffered or retried locally: if the queue refuses the job the
//! caller gets a 500 and must resubmit.

use axum::{Json, Router, body::Bytes, extract::State, routing::post};
use beacon_core::{JobQueue, validate_payload};
use beacon_web::handlers::{Readiness, docs_router, health_router};
use beacon_web::{AppError, CorrelationId, WebResult, correlation_id_layer};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// OpenAPI description served at `/api-docs`.
pub const OPENAPI: &str = include_str!("../docs/ingestion.yaml");

/// Shared state for the ingestion handlers.
#[derive(Clone)]
pub struct IngestionState {
    /// Queue accepted events are placed on.
    pub queue: Arc<dyn JobQueue>,
}

impl IngestionState {
    /// Create state around `queue`.
    #[must_use]
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }
}

/// Acknowledgement body.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Accepted {
    /// Always `true`
    pub success: bool,
    /// Always `"Event queued"`
    pub message: String,
}

/// Build the ingestion router.
#[must_use]
pub fn router(state: IngestionState) -> Router {
    let readiness = Readiness::new().with_check("queue", Arc::clone(&state.queue));

    Router::new()
        .route("/event", post(submit_event))
        .with_state(state)
        .merge(health_router(readiness))
        .merge(docs_router("Beacon Ingestion API", OPENAPI))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
}

/// `POST /event`
///
/// The body is read as raw bytes so that malformed JSON and schema failures
/// share the `{"error": ...}` response shape.
pub async fn submit_event(
    State(state): State<IngestionState>,
    correlation_id: CorrelationId,
    body: Bytes,
) -> WebResult<Json<Accepted>> {
    let payload: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
        metrics::counter!("ingestion_events_rejected_total").increment(1);
        AppError::bad_request(format!("invalid JSON body: {e}"))
    })?;

    let event = validate_payload(&payload).map_err(|e| {
        metrics::counter!("ingestion_events_rejected_total").increment(1);
        tracing::debug!(%correlation_id, error = %e, "Event rejected");
        AppError::bad_request(e.to_string())
    })?;

    let job_id = state.queue.enqueue(&event).await.map_err(|e| {
        metrics::counter!("ingestion_enqueue_errors_total").increment(1);
        AppError::internal("Failed to queue event").with_source(e.into())
    })?;

    tracing::info!(
        %correlation_id,
        job_id = %job_id,
        site_id = %event.site_id,
        event_type = %event.event_type,
        "Event queued"
    );
    metrics::counter!("ingestion_events_accepted_total").increment(1);

    Ok(Json(Accepted {
        success: true,
        message: "Event queued".to_string(),
    }))
}
