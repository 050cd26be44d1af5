//! Redis Streams job queue for the Beacon pipeline.
//!
//! This crate provides the durable queue between ingestion and the processor.
//! [`RedisJobQueue`] implements both [`JobQueue`] (producer) and
//! [`JobSource`] (consumer) from `beacon-core` on top of a Redis stream and a
//! consumer group.
//!
//! # Layout
//!
//! ```text
//! POST /event ──XADD──▶ stream "events" ──XREADGROUP──▶ processor
//!                          │    ▲                          │
//!                          │    └──────XCLAIM (idle)───────┤ fail
//!                          │                               │ XACK on success
//!                          └──▶ stream "events:failed" ◀───┘ after max deliveries
//! ```
//!
//! - **Job id**: the stream entry id assigned by `XADD`
//! - **Entry fields**: `name` (always `process-event`) and `data` (JSON payload)
//! - **Consumer group**: created with `MKSTREAM` from id `0`, so entries added
//!   before the first worker starts are still delivered
//!
//! # Delivery Semantics
//!
//! **At-least-once.** An entry stays in the group's pending list until it is
//! acknowledged. If a worker fails a job or crashes before `XACK`, the entry
//! is reclaimed by any worker once it has been idle for `claim_idle`. After
//! `max_deliveries` attempts a failed entry is copied to `<queue>:failed`
//! together with the last error and acknowledged.
//!
//! # Example
//!
//! ```no_run
//! use beacon_core::JobQueue;
//! use beacon_redis::RedisJobQueue;
//!
//! # async fn example(event: beacon_core::EventInput) -> Result<(), Box<dyn std::error::Error>> {
//! let queue = RedisJobQueue::builder()
//!     .url("redis://127.0.0.1:6379")
//!     .consumer_group("processors")
//!     .build()
//!     .await?;
//!
//! let job_id = queue.enqueue(&event).await?;
//! println!("queued {job_id}");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use beacon_core::queue::{EVENTS_QUEUE, PROCESS_EVENT_JOB, QueueFuture, encode_event};
use beacon_core::{EventInput, Job, JobId, JobQueue, JobSource, QueueError};
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::streams::{
    StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadOptions, StreamReadReply,
};
use redis::{AsyncCommands, Client, RedisError};
use std::time::Duration;

/// Stream entry field holding the job name.
pub const NAME_FIELD: &str = "name";

/// Stream entry field holding the JSON payload.
pub const DATA_FIELD: &str = "data";

/// Suffix of the dead-letter stream.
pub const FAILED_SUFFIX: &str = ":failed";

/// Default consumer group name.
pub const DEFAULT_CONSUMER_GROUP: &str = "processors";

/// Redis Streams implementation of [`JobQueue`] and [`JobSource`].
///
/// Cloning is cheap; clones share the underlying [`ConnectionManager`].
#[derive(Clone)]
pub struct RedisJobQueue {
    conn: ConnectionManager,
    queue: String,
    group: String,
    consumer: String,
    batch_size: usize,
    poll_interval: Duration,
    claim_idle: Duration,
    max_deliveries: u64,
}

impl std::fmt::Debug for RedisJobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisJobQueue")
            .field("queue", &self.queue)
            .field("group", &self.group)
            .field("consumer", &self.consumer)
            .field("batch_size", &self.batch_size)
            .field("poll_interval", &self.poll_interval)
            .field("claim_idle", &self.claim_idle)
            .field("max_deliveries", &self.max_deliveries)
            .finish_non_exhaustive()
    }
}

impl RedisJobQueue {
    /// Connect with default settings.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Unavailable`] if Redis cannot be reached.
    pub async fn new(url: &str) -> Result<Self, QueueError> {
        Self::builder().url(url).build().await
    }

    /// Create a new builder for configuring the queue.
    #[must_use]
    pub fn builder() -> RedisJobQueueBuilder {
        RedisJobQueueBuilder::default()
    }

    /// Stream key jobs are added to.
    #[must_use]
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// This worker's consumer name within the group.
    #[must_use]
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Stream key of the dead-letter stream.
    #[must_use]
    pub fn failed_queue(&self) -> String {
        format!("{}{FAILED_SUFFIX}", self.queue)
    }

    async fn ensure_group(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let created: Result<(), RedisError> = conn
            .xgroup_create_mkstream(&self.queue, &self.group, "0")
            .await;

        match created {
            Ok(()) => {
                tracing::info!(queue = %self.queue, group = %self.group, "Consumer group created");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(QueueError::Unavailable(format!(
                "Failed to create consumer group '{}': {e}",
                self.group
            ))),
        }
    }

    /// Claim entries other deliveries left pending for longer than `claim_idle`.
    ///
    /// The idle filter runs server side (`XPENDING ... IDLE`, Redis 6.2+), so
    /// recently delivered entries at the head of the pending list never hide
    /// stale ones behind them.
    async fn reclaim_stale(&self) -> Result<Vec<Job>, QueueError> {
        let mut conn = self.conn.clone();
        let idle_ms = duration_millis(self.claim_idle);

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.queue)
            .arg(&self.group)
            .arg("IDLE")
            .arg(idle_ms)
            .arg("-")
            .arg("+")
            .arg(self.batch_size)
            .query_async(&mut conn)
            .await
            .map_err(|e| self.consume_error(&e))?;

        let stale: Vec<&str> = pending.ids.iter().map(|p| p.id.as_str()).collect();

        if stale.is_empty() {
            return Ok(Vec::new());
        }

        let claimed: StreamClaimReply = conn
            .xclaim(&self.queue, &self.group, &self.consumer, idle_ms, stale.as_slice())
            .await
            .map_err(|e| self.consume_error(&e))?;

        // XCLAIM counts as a delivery
        let jobs: Vec<Job> = claimed
            .ids
            .iter()
            .map(|entry| {
                let previous = pending
                    .ids
                    .iter()
                    .find(|p| p.id == entry.id)
                    .map_or(0, |p| p.times_delivered as u64);
                job_from_entry(entry, previous + 1)
            })
            .collect();

        if !jobs.is_empty() {
            tracing::warn!(
                queue = %self.queue,
                consumer = %self.consumer,
                count = jobs.len(),
                "Reclaimed stale jobs for redelivery"
            );
            metrics::counter!("queue_jobs_reclaimed_total").increment(jobs.len() as u64);
        }

        Ok(jobs)
    }

    /// Block up to `poll_interval` for entries never delivered to the group.
    async fn read_new(&self) -> Result<Vec<Job>, QueueError> {
        let mut conn = self.conn.clone();

        #[allow(clippy::cast_possible_truncation)]
        let options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(self.batch_size)
            .block(duration_millis(self.poll_interval) as usize);

        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.queue], &[">"], &options)
            .await
            .map_err(|e| self.consume_error(&e))?;

        Ok(reply
            .into_iter()
            .flat_map(|r| r.keys)
            .flat_map(|k| k.ids)
            .map(|entry| job_from_entry(&entry, 1))
            .collect())
    }

    fn consume_error(&self, e: &RedisError) -> QueueError {
        if is_connection_error(e) {
            QueueError::Unavailable(e.to_string())
        } else {
            QueueError::Consume {
                queue: self.queue.clone(),
                reason: e.to_string(),
            }
        }
    }

    async fn dead_letter(&self, job: &Job, reason: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let failed = self.failed_queue();
        let deliveries = job.deliveries.to_string();

        let fields: [(&str, &str); 5] = [
            (NAME_FIELD, &job.name),
            (DATA_FIELD, &job.payload),
            ("job_id", job.id.as_str()),
            ("deliveries", &deliveries),
            ("error", reason),
        ];

        let (): () = redis::pipe()
            .atomic()
            .xadd(&failed, "*", &fields)
            .ignore()
            .xack(&self.queue, &self.group, &[job.id.as_str()])
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Ack {
                job_id: job.id.clone(),
                reason: format!("dead-letter failed: {e}"),
            })?;

        tracing::error!(
            job_id = %job.id,
            deliveries = job.deliveries,
            dead_letter_queue = %failed,
            error = %reason,
            "Job exhausted its deliveries and was dead-lettered"
        );
        metrics::counter!("queue_jobs_dead_lettered_total").increment(1);

        Ok(())
    }
}

/// Build a [`Job`] from a stream entry.
///
/// Missing fields decode as empty strings; the consumer rejects such jobs
/// like any other malformed payload.
#[must_use]
pub fn job_from_entry(entry: &StreamId, deliveries: u64) -> Job {
    Job {
        id: JobId::new(entry.id.clone()),
        name: entry.get::<String>(NAME_FIELD).unwrap_or_default(),
        payload: entry.get::<String>(DATA_FIELD).unwrap_or_default(),
        deliveries,
    }
}

fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn is_connection_error(e: &RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
}

impl JobQueue for RedisJobQueue {
    fn enqueue(&self, event: &EventInput) -> QueueFuture<'_, JobId> {
        let payload = encode_event(event);
        let site_id = event.site_id.clone();

        Box::pin(async move {
            let payload = payload?;
            let mut conn = self.conn.clone();

            let id: String = conn
                .xadd(
                    &self.queue,
                    "*",
                    &[(NAME_FIELD, PROCESS_EVENT_JOB), (DATA_FIELD, payload.as_str())],
                )
                .await
                .map_err(|e| {
                    if is_connection_error(&e) {
                        QueueError::Unavailable(e.to_string())
                    } else {
                        QueueError::Enqueue {
                            queue: self.queue.clone(),
                            reason: e.to_string(),
                        }
                    }
                })?;

            tracing::debug!(queue = %self.queue, job_id = %id, site_id = %site_id, "Job enqueued");
            metrics::counter!("queue_jobs_enqueued_total").increment(1);

            Ok(JobId::new(id))
        })
    }

    fn ping(&self) -> QueueFuture<'_, ()> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let _: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(|e| QueueError::Unavailable(e.to_string()))?;
            Ok(())
        })
    }
}

impl JobSource for RedisJobQueue {
    fn next_batch(&self) -> QueueFuture<'_, Vec<Job>> {
        Box::pin(async move {
            let reclaimed = self.reclaim_stale().await?;
            if !reclaimed.is_empty() {
                return Ok(reclaimed);
            }
            self.read_new().await
        })
    }

    fn complete<'a>(&'a self, job: &'a Job) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let _: i64 = conn
                .xack(&self.queue, &self.group, &[job.id.as_str()])
                .await
                .map_err(|e| QueueError::Ack {
                    job_id: job.id.clone(),
                    reason: e.to_string(),
                })?;
            Ok(())
        })
    }

    fn fail<'a>(&'a self, job: &'a Job, reason: &'a str) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            if job.deliveries >= self.max_deliveries {
                return self.dead_letter(job, reason).await;
            }

            // Left pending; reclaimed after `claim_idle`
            tracing::debug!(
                job_id = %job.id,
                deliveries = job.deliveries,
                max_deliveries = self.max_deliveries,
                "Job left pending for redelivery"
            );
            Ok(())
        })
    }
}

/// Builder for configuring a [`RedisJobQueue`].
///
/// # Example
///
/// ```no_run
/// use beacon_redis::RedisJobQueue;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let queue = RedisJobQueue::builder()
///     .url("redis://127.0.0.1:6379")
///     .queue("events")
///     .consumer_group("processors")
///     .batch_size(50)
///     .poll_interval(Duration::from_secs(2))
///     .claim_idle(Duration::from_secs(60))
///     .max_deliveries(10)
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Default, Debug, Clone)]
pub struct RedisJobQueueBuilder {
    url: Option<String>,
    queue: Option<String>,
    group: Option<String>,
    consumer: Option<String>,
    batch_size: Option<usize>,
    poll_interval: Option<Duration>,
    claim_idle: Option<Duration>,
    max_deliveries: Option<u64>,
}

impl RedisJobQueueBuilder {
    /// Set the Redis connection URL (required).
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the stream key.
    ///
    /// Default: `"events"`
    #[must_use]
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    /// Set the consumer group shared by all processor instances.
    ///
    /// Default: `"processors"`
    #[must_use]
    pub fn consumer_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Set this worker's consumer name. Must be unique per running worker.
    ///
    /// Default: `"worker-<uuid>"`
    #[must_use]
    pub fn consumer_name(mut self, consumer: impl Into<String>) -> Self {
        self.consumer = Some(consumer.into());
        self
    }

    /// Set the maximum number of jobs returned by one `next_batch` call.
    /// Zero is treated as one.
    ///
    /// Default: 10
    #[must_use]
    pub const fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Set how long `next_batch` blocks waiting for new entries.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = Some(poll_interval);
        self
    }

    /// Set how long an unacknowledged entry must sit idle before another
    /// delivery is attempted.
    ///
    /// Default: 30 seconds
    #[must_use]
    pub const fn claim_idle(mut self, claim_idle: Duration) -> Self {
        self.claim_idle = Some(claim_idle);
        self
    }

    /// Set the number of deliveries after which a failing job is
    /// dead-lettered. Zero is treated as one.
    ///
    /// Default: 5
    #[must_use]
    pub const fn max_deliveries(mut self, max_deliveries: u64) -> Self {
        self.max_deliveries = Some(max_deliveries);
        self
    }

    /// Connect and make sure the consumer group exists.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Unavailable`] if:
    /// - URL not set or invalid
    /// - Redis cannot be reached
    /// - The consumer group cannot be created
    pub async fn build(self) -> Result<RedisJobQueue, QueueError> {
        let url = self
            .url
            .ok_or_else(|| QueueError::Unavailable("Redis URL not configured".to_string()))?;

        let poll_interval = self.poll_interval.unwrap_or(Duration::from_secs(5));

        let client = Client::open(url.as_str())
            .map_err(|e| QueueError::Unavailable(format!("Failed to create Redis client: {e}")))?;

        // Blocking reads hold the connection for up to `poll_interval`
        let config = ConnectionManagerConfig::new()
            .set_response_timeout(poll_interval + Duration::from_secs(5));

        let conn = ConnectionManager::new_with_config(client, config)
            .await
            .map_err(|e| {
                QueueError::Unavailable(format!("Failed to create Redis connection manager: {e}"))
            })?;

        let queue = RedisJobQueue {
            conn,
            queue: self.queue.unwrap_or_else(|| EVENTS_QUEUE.to_string()),
            group: self
                .group
                .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string()),
            consumer: self
                .consumer
                .unwrap_or_else(|| format!("worker-{}", uuid::Uuid::new_v4())),
            batch_size: self.batch_size.unwrap_or(10).max(1),
            poll_interval,
            claim_idle: self.claim_idle.unwrap_or(Duration::from_secs(30)),
            max_deliveries: self.max_deliveries.unwrap_or(5).max(1),
        };

        queue.ensure_group().await?;

        tracing::info!(
            queue = %queue.queue,
            group = %queue.group,
            consumer = %queue.consumer,
            batch_size = queue.batch_size,
            max_deliveries = queue.max_deliveries,
            "RedisJobQueue created successfully"
        );

        Ok(queue)
    }
}
