//! # Beacon Testing
//!
//! In-memory fakes and fixtures for testing the Beacon pipeline without
//! Redis or Postgres.
//!
//! This crate provides:
//! - [`InMemoryJobQueue`]: producer and consumer sides of the event queue,
//!   with redelivery of failed jobs and outage injection
//! - [`InMemoryEventStore`]: a `Vec`-backed event store that aggregates with
//!   the reference [`summarize`](beacon_core::stats::summarize)
//! - [`fixtures`]: ready-made payloads
//!
//! ## Example
//!
//! ```
//! use beacon_core::{EventStore, JobQueue, StatsQuery};
//! use beacon_testing::{fixtures, InMemoryEventStore, InMemoryJobQueue};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = InMemoryJobQueue::new();
//! queue.enqueue(&fixtures::page_view("s1", "/home", "u1")).await?;
//! assert_eq!(queue.enqueued().len(), 1);
//!
//! let store = InMemoryEventStore::new();
//! let summary = store.page_view_summary(&StatsQuery::all_time("s1")).await?;
//! assert_eq!(summary.total_views, 0);
//! # Ok(())
//! # }
//! ```

pub mod queue_mocks;
pub mod store_mocks;

/// Ready-made payloads for tests.
pub mod fixtures {
    use beacon_core::EventInput;
    use beacon_core::stats::PAGE_VIEW;

    /// Timestamp used by fixtures that do not care about time.
    pub const DEFAULT_TIMESTAMP: &str = "2024-01-01T10:00:00Z";

    /// A `page_view` input at [`DEFAULT_TIMESTAMP`].
    #[must_use]
    pub fn page_view(site_id: &str, path: &str, user_id: &str) -> EventInput {
        page_view_at(site_id, path, user_id, DEFAULT_TIMESTAMP)
    }

    /// A `page_view` input at `timestamp`.
    #[must_use]
    pub fn page_view_at(site_id: &str, path: &str, user_id: &str, timestamp: &str) -> EventInput {
        EventInput {
            site_id: site_id.to_string(),
            event_type: PAGE_VIEW.to_string(),
            path: path.to_string(),
            user_id: user_id.to_string(),
            timestamp: timestamp.to_string(),
        }
    }
}

// Re-export commonly used items
pub use queue_mocks::InMemoryJobQueue;
pub use store_mocks::InMemoryEventStore;
