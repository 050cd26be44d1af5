//! In-memory event store.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use beacon_core::stats::summarize;
use beacon_core::store::StoreFuture;
use beacon_core::{Event, EventStore, StatsQuery, StoreError, Summary};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

/// `Vec`-backed [`EventStore`] with failure injection.
///
/// Inserts append without dedup, exactly like the real table, so redelivery
/// tests see duplicate rows.
#[derive(Clone, Debug, Default)]
pub struct InMemoryEventStore {
    rows: Arc<RwLock<Vec<Event>>>,
    fail_inserts: Arc<AtomicBool>,
    fail_queries: Arc<AtomicBool>,
}

impl InMemoryEventStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `events`.
    #[must_use]
    pub fn with_events(events: impl IntoIterator<Item = Event>) -> Self {
        let store = Self::new();
        store.rows.write().unwrap().extend(events);
        store
    }

    /// Make every subsequent insert fail (or succeed again).
    pub fn set_insert_failure(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent query fail (or succeed again).
    pub fn set_query_failure(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of all stored rows, in insert order.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.rows.read().unwrap().clone()
    }

    /// Number of stored rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().unwrap().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.read().unwrap().is_empty()
    }
}

impl EventStore for InMemoryEventStore {
    fn insert_event<'a>(&'a self, event: &'a Event) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            if self.fail_inserts.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("in-memory store is down".to_string()));
            }
            self.rows.write().unwrap().push(event.clone());
            Ok(())
        })
    }

    fn page_view_summary<'a>(&'a self, query: &'a StatsQuery) -> StoreFuture<'a, Summary> {
        Box::pin(async move {
            if self.fail_queries.load(Ordering::SeqCst) {
                return Err(StoreError::Query("in-memory query failure".to_string()));
            }
            let rows = self.rows.read().unwrap();
            Ok(summarize(rows.iter().filter(|e| query.matches(e))))
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            if self.fail_queries.load(Ordering::SeqCst) {
                Err(StoreError::Unavailable("in-memory store is down".to_string()))
            } else {
                Ok(())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use beacon_core::NaiveDate;

    fn event(site: &str, path: &str, user: &str, ts: &str) -> Event {
        Event::try_from(fixtures::page_view_at(site, path, user, ts)).unwrap()
    }

    #[tokio::test]
    async fn insert_keeps_duplicates() {
        let store = InMemoryEventStore::new();
        let e = event("s1", "/", "u1", "2024-01-01T10:00:00Z");

        store.insert_event(&e).await.unwrap();
        store.insert_event(&e).await.unwrap();

        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn summary_respects_day_window() {
        let store = InMemoryEventStore::with_events([
            event("s1", "/a", "u1", "2024-01-01T00:00:00Z"),
            event("s1", "/a", "u2", "2024-01-01T23:59:59Z"),
            event("s1", "/b", "u3", "2024-01-02T00:00:00Z"),
            event("s2", "/a", "u1", "2024-01-01T12:00:00Z"),
        ]);

        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let summary = store
            .page_view_summary(&StatsQuery::for_day("s1", day))
            .await
            .unwrap();

        assert_eq!(summary.total_views, 2);
        assert_eq!(summary.unique_users, 2);
        assert_eq!(summary.top_paths.len(), 1);
        assert_eq!(summary.top_paths[0].path, "/a");
    }

    #[tokio::test]
    async fn failures_are_injectable() {
        let store = InMemoryEventStore::new();
        store.set_insert_failure(true);
        store.set_query_failure(true);

        let e = event("s1", "/", "u1", "2024-01-01T10:00:00Z");
        assert!(store.insert_event(&e).await.is_err());
        assert!(store.page_view_summary(&StatsQuery::all_time("s1")).await.is_err());
        assert!(store.is_empty());
    }
}
