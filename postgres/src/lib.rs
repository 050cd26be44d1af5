//! `PostgreSQL` event store for the Beacon pipeline.
//!
//! This crate provides the production implementation of the
//! [`EventStore`] trait from `beacon-core`, built on sqlx:
//!
//! - Single-row inserts for the processor (no dedup key)
//! - Report aggregation with parameterized group-by queries
//! - Connection pooling via [`PgPoolOptions`]
//! - Embedded schema migrations
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE events (
//!     id BIGSERIAL PRIMARY KEY,
//!     site_id TEXT NOT NULL,
//!     event_type TEXT NOT NULL,
//!     path TEXT NOT NULL,
//!     user_id TEXT NOT NULL,
//!     occurred_at TIMESTAMPTZ NOT NULL,
//!     received_at TIMESTAMPTZ NOT NULL DEFAULT now()
//! );
//! ```
//!
//! # Example
//!
//! ```no_run
//! use beacon_postgres::{PostgresConfig, PostgresEventStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresEventStore::connect(&PostgresConfig::new("postgres://localhost/beacon")).await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use beacon_core::stats::{PAGE_VIEW, TOP_PATHS_LIMIT};
use beacon_core::store::StoreFuture;
use beacon_core::{Event, EventStore, PathViews, StatsQuery, StoreError, Summary};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Connection pool settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    /// `PostgreSQL` connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of idle connections in the pool
    pub min_connections: u32,
    /// How long to wait for a connection before giving up
    pub connect_timeout: Duration,
}

impl PostgresConfig {
    /// Settings for `url` with default pool sizing.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Rows matching the report filter: site, type pinned to `page_view`, and an
/// optional half-open `[start, end)` window on `occurred_at`.
const FILTER: &str = "site_id = $1
       AND event_type = $2
       AND ($3::timestamptz IS NULL OR occurred_at >= $3)
       AND ($4::timestamptz IS NULL OR occurred_at < $4)";

/// PostgreSQL-backed [`EventStore`].
#[derive(Clone, Debug)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    /// Connect a new pool.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the database cannot be reached.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .connect(&config.url)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to connect to database: {e}")))?;

        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "PostgresEventStore connected"
        );

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations.
    ///
    /// Safe to call from several processes at once; sqlx serializes
    /// migrations with an advisory lock.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Migration`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        tracing::info!("Event store migrations applied");
        Ok(())
    }

    async fn summarize(&self, query: &StatsQuery) -> Result<Summary, StoreError> {
        let (start, end): (Option<DateTime<Utc>>, Option<DateTime<Utc>>) = query
            .window()
            .map_or((None, None), |w| (Some(w.start), Some(w.end)));

        // Both statements read the same snapshot, so the three aggregates agree.
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        let (total_views, unique_users): (i64, i64) = sqlx::query_as(&format!(
            "SELECT COUNT(*), COUNT(DISTINCT user_id) FROM events WHERE {FILTER}"
        ))
        .bind(&query.site_id)
        .bind(PAGE_VIEW)
        .bind(start)
        .bind(end)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        #[allow(clippy::cast_possible_wrap)] // TOP_PATHS_LIMIT is tiny
        let top: Vec<(String, i64)> = sqlx::query_as(&format!(
            "SELECT path, COUNT(*) FROM events WHERE {FILTER}
             GROUP BY path
             ORDER BY COUNT(*) DESC, path COLLATE \"C\" ASC
             LIMIT $5"
        ))
        .bind(&query.site_id)
        .bind(PAGE_VIEW)
        .bind(start)
        .bind(end)
        .bind(TOP_PATHS_LIMIT as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;

        #[allow(clippy::cast_sign_loss)] // Counts are always non-negative
        Ok(Summary {
            total_views: total_views as u64,
            unique_users: unique_users as u64,
            top_paths: top
                .into_iter()
                .map(|(path, views)| PathViews {
                    path,
                    views: views as u64,
                })
                .collect(),
        })
    }
}

/// Connection-level failures are `Unavailable`; everything else is a failed statement.
fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
        other => StoreError::Query(other.to_string()),
    }
}

impl EventStore for PostgresEventStore {
    fn insert_event<'a>(&'a self, event: &'a Event) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO events (site_id, event_type, path, user_id, occurred_at)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(&event.site_id)
            .bind(&event.event_type)
            .bind(&event.path)
            .bind(&event.user_id)
            .bind(event.timestamp)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

            tracing::debug!(
                site_id = %event.site_id,
                event_type = %event.event_type,
                "Event row inserted"
            );
            metrics::counter!("event_store_rows_inserted_total").increment(1);

            Ok(())
        })
    }

    fn page_view_summary<'a>(&'a self, query: &'a StatsQuery) -> StoreFuture<'a, Summary> {
        Box::pin(async move {
            let summary = self.summarize(query).await?;
            tracing::debug!(
                site_id = %query.site_id,
                day = ?query.day,
                total_views = summary.total_views,
                "Page view summary computed"
            );
            Ok(summary)
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postgres_event_store_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<PostgresEventStore>();
        assert_sync::<PostgresEventStore>();
    }

    #[test]
    fn config_defaults() {
        let config = PostgresConfig::new("postgres://localhost/beacon");
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
    }

    #[test]
    fn pool_errors_map_to_unavailable() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolTimedOut),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            map_sqlx_error(sqlx::Error::RowNotFound),
            StoreError::Query(_)
        ));
    }
}
