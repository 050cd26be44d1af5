//! End-to-end pipeline tests: ingestion router → queue → processor → store →
//! reporting router, wired through the in-memory fakes.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use beacon_services::{IngestionState, Processor, ReportingState, ingestion, reporting};
use beacon_testing::{InMemoryEventStore, InMemoryJobQueue};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

struct Pipeline {
    queue: InMemoryJobQueue,
    store: InMemoryEventStore,
    ingestion: Router,
    reporting: Router,
    processor: Processor,
}

impl Pipeline {
    fn new() -> Self {
        let queue = InMemoryJobQueue::new();
        let store = InMemoryEventStore::new();
        Self {
            ingestion: ingestion::router(IngestionState::new(Arc::new(queue.clone()))),
            reporting: reporting::router(ReportingState::new(Arc::new(store.clone()))),
            processor: Processor::new(Arc::new(queue.clone()), Arc::new(store.clone())),
            queue,
            store,
        }
    }

    async fn submit(&self, payload: &Value) -> StatusCode {
        self.ingestion
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/event")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
            .status()
    }

    async fn drain(&self) {
        while !self.queue.is_empty() {
            self.processor.run_once().await.unwrap();
        }
    }

    async fn stats(&self, query: &str) -> (StatusCode, Value) {
        let response = self
            .reporting
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/stats?{query}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }
}

fn page_view(site: &str, path: &str, user: &str, ts: &str) -> Value {
    json!({
        "site_id": site,
        "event_type": "page_view",
        "path": path,
        "user_id": user,
        "timestamp": ts,
    })
}

#[tokio::test]
async fn submitted_event_shows_up_in_stats() {
    let pipeline = Pipeline::new();

    let status = pipeline
        .submit(&page_view("s1", "/home", "u1", "2024-01-01T10:00:00Z"))
        .await;
    assert_eq!(status, StatusCode::OK);

    pipeline.drain().await;

    let (status, body) = pipeline.stats("site_id=s1&date=2024-01-01").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "site_id": "s1",
            "date": "2024-01-01",
            "total_views": 1,
            "unique_users": 1,
            "top_paths": [{"path": "/home", "views": 1}]
        })
    );
}

#[tokio::test]
async fn rejected_event_never_reaches_the_store() {
    let pipeline = Pipeline::new();
    let mut payload = page_view("s1", "/home", "u1", "2024-01-01T10:00:00Z");
    payload.as_object_mut().unwrap().remove("user_id");

    assert_eq!(pipeline.submit(&payload).await, StatusCode::BAD_REQUEST);
    pipeline.drain().await;

    assert!(pipeline.store.is_empty());
    let (_, body) = pipeline.stats("site_id=s1").await;
    assert_eq!(body["total_views"], 0);
}

#[tokio::test]
async fn day_filter_uses_utc_boundaries() {
    let pipeline = Pipeline::new();
    for (path, ts) in [
        ("/early", "2023-12-31T23:59:59Z"),
        ("/a", "2024-01-01T00:00:00Z"),
        // 2024-01-01T22:30:00Z
        ("/a", "2024-01-02T00:30:00+02:00"),
        ("/late", "2024-01-02T00:00:00Z"),
    ] {
        assert_eq!(pipeline.submit(&page_view("s1", path, "u1", ts)).await, StatusCode::OK);
    }
    pipeline.drain().await;

    let (_, body) = pipeline.stats("site_id=s1&date=2024-01-01").await;
    assert_eq!(body["total_views"], 2);
    assert_eq!(body["top_paths"], json!([{"path": "/a", "views": 2}]));

    let (_, body) = pipeline.stats("site_id=s1").await;
    assert_eq!(body["total_views"], 4);
}

#[tokio::test]
async fn only_page_views_of_the_site_are_counted() {
    let pipeline = Pipeline::new();
    let mut click = page_view("s1", "/buy", "u1", "2024-01-01T10:00:00Z");
    click["event_type"] = json!("click");

    pipeline.submit(&click).await;
    pipeline
        .submit(&page_view("s2", "/home", "u2", "2024-01-01T10:00:00Z"))
        .await;
    pipeline
        .submit(&page_view("s1", "/home", "u3", "2024-01-01T10:00:00Z"))
        .await;
    pipeline.drain().await;

    assert_eq!(pipeline.store.len(), 3);
    let (_, body) = pipeline.stats("site_id=s1").await;
    assert_eq!(body["total_views"], 1);
    assert_eq!(body["unique_users"], 1);
}

#[tokio::test]
async fn store_outage_is_recovered_by_redelivery() {
    let pipeline = Pipeline::new();
    pipeline
        .submit(&page_view("s1", "/home", "u1", "2024-01-01T10:00:00Z"))
        .await;

    pipeline.store.set_insert_failure(true);
    pipeline.processor.run_once().await.unwrap();
    assert!(pipeline.store.is_empty());

    pipeline.store.set_insert_failure(false);
    pipeline.drain().await;

    let (_, body) = pipeline.stats("site_id=s1").await;
    assert_eq!(body["total_views"], 1);
    assert_eq!(pipeline.queue.failures().len(), 1);
}

#[tokio::test]
async fn top_paths_are_capped_and_ordered() {
    let pipeline = Pipeline::new();
    for (path, count) in [("/a", 1), ("/b", 3), ("/c", 2), ("/d", 2), ("/e", 1)] {
        for i in 0..count {
            pipeline
                .submit(&page_view("s1", path, &format!("u{i}"), "2024-01-01T10:00:00Z"))
                .await;
        }
    }
    pipeline.drain().await;

    let (_, body) = pipeline.stats("site_id=s1&date=2024-01-01").await;
    assert_eq!(body["total_views"], 9);
    assert_eq!(body["unique_users"], 3);
    assert_eq!(
        body["top_paths"],
        json!([
            {"path": "/b", "views": 3},
            {"path": "/c", "views": 2},
            {"path": "/d", "views": 2}
        ])
    );
}
