//! Event storage trait shared by the processor (writes) and reporting (reads).
//!
//! The store is append-only from this system's point of view: one row per
//! processed job, never updated, never deleted. There is no uniqueness
//! constraint, so a redelivered job produces a duplicate row. That is the
//! accepted cost of at-least-once delivery.

use crate::event::Event;
use crate::stats::{StatsQuery, Summary};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The database cannot be reached or the pool is exhausted
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A statement failed (constraint violation, bad SQL, ...)
    #[error("Query failed: {0}")]
    Query(String),

    /// Schema migrations could not be applied
    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Trait for event storage backends.
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns so it can be used
/// as `Arc<dyn EventStore>` in handler and worker state.
pub trait EventStore: Send + Sync {
    /// Insert one event as a single row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the row is not committed.
    fn insert_event<'a>(&'a self, event: &'a Event) -> StoreFuture<'a, ()>;

    /// Aggregate `page_view` events selected by `query`.
    ///
    /// All three aggregates must be computed from the same filtered set;
    /// no partial results.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if any part of the aggregation fails.
    fn page_view_summary<'a>(&'a self, query: &'a StatsQuery) -> StoreFuture<'a, Summary>;

    /// Check that the store is reachable.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if it is not.
    fn ping(&self) -> StoreFuture<'_, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StoreError::Unavailable("pool timed out".to_string());
        assert_eq!(err.to_string(), "Store unavailable: pool timed out");
    }

    #[test]
    fn trait_is_object_safe() {
        fn assert_store(_: Option<&dyn EventStore>) {}
        assert_store(None);
    }
}
