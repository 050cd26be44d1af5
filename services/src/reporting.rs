//! Reporting service: page view summaries per site.
//!
//! # Endpoints
//!
//! - `GET /stats?site_id=<id>[&date=YYYY-MM-DD]`
//! - `GET /health`, `GET /ready`, `GET /api-docs`
//!
//! Day boundaries are UTC. The query string is parsed by hand rather than
//! through `Query<T>` so that every rejection carries the service's own
//! message.

use axum::{
    Json, Router,
    extract::{RawQuery, State},
    routing::get,
};
use beacon_core::stats::parse_day;
use beacon_core::{EventStore, NaiveDate, PathViews, StatsQuery};
use beacon_web::handlers::{Readiness, docs_router, health_router};
use beacon_web::{AppError, WebResult, correlation_id_layer};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// OpenAPI description served at `/api-docs`.
pub const OPENAPI: &str = include_str!("../docs/reporting.yaml");

/// Shared state for the reporting handlers.
#[derive(Clone)]
pub struct ReportingState {
    /// Store reports are computed from.
    pub store: Arc<dyn EventStore>,
}

impl ReportingState {
    /// Create state around `store`.
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }
}

/// `GET /stats` response body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatsResponse {
    /// Echo of the requested site
    pub site_id: String,
    /// Echo of the requested day, absent when none was given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Matching `page_view` rows
    pub total_views: u64,
    /// Distinct users among them
    pub unique_users: u64,
    /// Up to three most viewed paths
    pub top_paths: Vec<PathViews>,
}

/// Build the reporting router.
#[must_use]
pub fn router(state: ReportingState) -> Router {
    let readiness = Readiness::new().with_check("database", Arc::clone(&state.store));

    Router::new()
        .route("/stats", get(stats))
        .with_state(state)
        .merge(health_router(readiness))
        .merge(docs_router("Beacon Reporting API", OPENAPI))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
}

/// Turn a raw query string into a [`StatsQuery`].
///
/// `site_id` must appear exactly once with a non-empty value. An empty
/// `date` counts as absent; the last `date` wins if repeated.
///
/// # Errors
///
/// Returns a 400 [`AppError`] with `site_id required` or the date format
/// message.
pub fn parse_stats_query(raw: Option<&str>) -> Result<StatsQuery, AppError> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(raw.unwrap_or_default())
        .map_err(|_| AppError::bad_request("site_id required"))?;

    let mut site_ids = pairs.iter().filter(|(k, _)| k == "site_id").map(|(_, v)| v);
    let site_id = match (site_ids.next(), site_ids.next()) {
        (Some(site_id), None) if !site_id.is_empty() => site_id.clone(),
        _ => return Err(AppError::bad_request("site_id required")),
    };

    let day: Option<NaiveDate> = pairs
        .iter()
        .rev()
        .find(|(k, _)| k == "date")
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.is_empty())
        .map(parse_day)
        .transpose()
        .map_err(|e| AppError::bad_request(e.to_string()))?;

    Ok(StatsQuery { site_id, day })
}

/// `GET /stats`
pub async fn stats(
    State(state): State<ReportingState>,
    RawQuery(raw): RawQuery,
) -> WebResult<Json<StatsResponse>> {
    let query = parse_stats_query(raw.as_deref())?;
    metrics::counter!("reporting_queries_total").increment(1);

    let summary = state.store.page_view_summary(&query).await.map_err(|e| {
        metrics::counter!("reporting_query_errors_total").increment(1);
        AppError::from(anyhow::Error::from(e))
    })?;

    tracing::debug!(
        site_id = %query.site_id,
        day = ?query.day,
        total_views = summary.total_views,
        "Stats served"
    );

    Ok(Json(StatsResponse {
        date: query.day.map(|d| d.format(beacon_core::stats::DAY_FORMAT).to_string()),
        site_id: query.site_id,
        total_views: summary.total_views,
        unique_users: summary.unique_users,
        top_paths: summary.top_paths,
    }))
}
