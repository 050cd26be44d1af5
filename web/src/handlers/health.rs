//! Health check endpoints.
//!
//! These endpoints are used by load balancers and orchestrators to verify
//! service health.
//!
//! - `GET /health`: liveness, never touches dependencies
//! - `GET /ready`: readiness, pings every registered dependency

use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use beacon_core::{EventStore, JobQueue};
use futures::future::join_all;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by [`DependencyCheck::check`].
pub type CheckFuture<'a> = Pin<Box<dyn Future<Output = Result<(), String>> + Send + 'a>>;

/// A dependency the service needs in order to serve traffic.
pub trait DependencyCheck: Send + Sync {
    /// Succeed if the dependency answers.
    fn check(&self) -> CheckFuture<'_>;
}

impl DependencyCheck for Arc<dyn JobQueue> {
    fn check(&self) -> CheckFuture<'_> {
        Box::pin(async move { self.ping().await.map_err(|e| e.to_string()) })
    }
}

impl DependencyCheck for Arc<dyn EventStore> {
    fn check(&self) -> CheckFuture<'_> {
        Box::pin(async move { self.ping().await.map_err(|e| e.to_string()) })
    }
}

/// Named dependency checks run by [`readiness`].
#[derive(Clone, Default)]
pub struct Readiness {
    checks: Vec<(&'static str, Arc<dyn DependencyCheck>)>,
}

impl Readiness {
    /// No dependencies; always ready.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dependency under `name`.
    #[must_use]
    pub fn with_check(mut self, name: &'static str, check: impl DependencyCheck + 'static) -> Self {
        self.checks.push((name, Arc::new(check)));
        self
    }
}

/// Outcome of one dependency check.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct CheckResult {
    /// Dependency name
    pub name: &'static str,
    /// `"ok"` or `"unavailable"`
    pub status: &'static str,
    /// Failure detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Readiness response body.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ReadinessReport {
    /// `"ready"` or `"unavailable"`
    pub status: &'static str,
    /// Per-dependency results
    pub checks: Vec<CheckResult>,
}

/// Liveness endpoint.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
///
/// # Response
///
/// ```json
/// { "status": "ok" }
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// Readiness endpoint.
///
/// # Status Codes
///
/// - 200 OK: every dependency answered
/// - 503 Service Unavailable: at least one did not
pub async fn readiness(State(readiness): State<Readiness>) -> (StatusCode, Json<ReadinessReport>) {
    let results = join_all(readiness.checks.iter().map(|(name, check)| async move {
        let name = *name;
        match check.check().await {
            Ok(()) => CheckResult {
                name,
                status: "ok",
                error: None,
            },
            Err(error) => {
                tracing::warn!(dependency = name, error = %error, "Readiness check failed");
                CheckResult {
                    name,
                    status: "unavailable",
                    error: Some(error),
                }
            }
        }
    }))
    .await;

    let ready = results.iter().all(|r| r.error.is_none());
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessReport {
            status: if ready { "ready" } else { "unavailable" },
            checks: results,
        }),
    )
}

/// Router serving `/health` and `/ready`.
pub fn health_router(readiness_checks: Readiness) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness))
        .with_state(readiness_checks)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use beacon_testing::{InMemoryEventStore, InMemoryJobQueue};

    #[tokio::test]
    async fn test_simple_health_check() {
        let (status, Json(body)) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_ready_when_dependencies_answer() {
        let queue: Arc<dyn JobQueue> = Arc::new(InMemoryJobQueue::new());
        let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
        let checks = Readiness::new()
            .with_check("queue", queue)
            .with_check("database", store);

        let (status, Json(report)) = readiness(State(checks)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(report.status, "ready");
        assert_eq!(report.checks.len(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_dependency_fails_readiness() {
        let queue = InMemoryJobQueue::new();
        queue.set_unavailable(true);
        let queue: Arc<dyn JobQueue> = Arc::new(queue);

        let checks = Readiness::new().with_check("queue", queue);
        let (status, Json(report)) = readiness(State(checks)).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(report.status, "unavailable");
        assert_eq!(report.checks[0].name, "queue");
        assert!(report.checks[0].error.is_some());
    }
}
