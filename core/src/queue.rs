//! Job queue contract between ingestion and the processor.
//!
//! Ingestion is the producer: it places one `process-event` job per accepted
//! payload on the `events` queue via [`JobQueue`]. The processor is the
//! consumer: it pulls batches from a [`JobSource`], then marks each job
//! completed or failed.
//!
//! # Delivery Semantics
//!
//! **At-least-once.** A job that is read but never completed (worker crash,
//! failed insert) is redelivered by the queue backend. Redelivery is the
//! backend's business; consumers never retry on their own. Jobs are
//! independent: no ordering key, no ordering guarantee across workers.
//!
//! # Implementations
//!
//! - `RedisJobQueue` in `beacon-redis` (Redis Streams consumer groups)
//! - `InMemoryJobQueue` in `beacon-testing`

use crate::event::EventInput;
use serde::de::DeserializeOwned;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Queue the ingestion endpoint produces to and the processor consumes from.
pub const EVENTS_QUEUE: &str = "events";

/// Job name for a validated event awaiting persistence.
pub const PROCESS_EVENT_JOB: &str = "process-event";

/// Errors that can occur during queue operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The queue backend cannot be reached
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    /// Failed to add a job
    #[error("Enqueue failed for queue '{queue}': {reason}")]
    Enqueue {
        /// The queue that rejected the job
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to read jobs
    #[error("Consume failed for queue '{queue}': {reason}")]
    Consume {
        /// The queue being read
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to acknowledge or fail a job
    #[error("Acknowledge failed for job {job_id}: {reason}")]
    Ack {
        /// The job being acknowledged
        job_id: JobId,
        /// The reason for failure
        reason: String,
    },

    /// A payload could not be encoded or decoded
    #[error("Encoding error: {0}")]
    Encoding(String),
}

/// Opaque job identifier assigned by the queue backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(String);

impl JobId {
    /// Wrap a backend-assigned identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A job as delivered to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Backend-assigned identifier.
    pub id: JobId,
    /// Job name, `process-event` for everything ingestion produces.
    pub name: String,
    /// JSON-encoded payload.
    pub payload: String,
    /// How many times this job has been handed to a consumer, this delivery included.
    pub deliveries: u64,
}

impl Job {
    /// Decode the JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Encoding`] if the payload does not match `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, QueueError> {
        serde_json::from_str(&self.payload)
            .map_err(|e| QueueError::Encoding(format!("job {}: {e}", self.id)))
    }

    /// Whether this job has been delivered before.
    #[must_use]
    pub const fn is_redelivery(&self) -> bool {
        self.deliveries > 1
    }
}

/// Encode an event as a job payload.
///
/// # Errors
///
/// Returns [`QueueError::Encoding`] if serialization fails.
pub fn encode_event(event: &EventInput) -> Result<String, QueueError> {
    serde_json::to_string(event).map_err(|e| QueueError::Encoding(e.to_string()))
}

/// Boxed future returned by queue operations.
pub type QueueFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, QueueError>> + Send + 'a>>;

/// Producer side of the event queue.
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns so it can be used
/// as `Arc<dyn JobQueue>` in handler state.
pub trait JobQueue: Send + Sync {
    /// Add one `process-event` job carrying `event`.
    ///
    /// Success means the job is durably queued, not that the event is stored.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the backend is unreachable or rejects the job.
    fn enqueue(&self, event: &EventInput) -> QueueFuture<'_, JobId>;

    /// Check that the backend is reachable.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Unavailable`] if it is not.
    fn ping(&self) -> QueueFuture<'_, ()>;
}

/// Consumer side of the event queue.
pub trait JobSource: Send + Sync {
    /// Fetch the next batch of jobs for this consumer.
    ///
    /// May wait up to a backend-defined poll interval and return an empty
    /// batch if nothing arrived.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the backend cannot be read.
    fn next_batch(&self) -> QueueFuture<'_, Vec<Job>>;

    /// Mark a job as done. It will not be delivered again.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Ack`] if the acknowledgement is not recorded.
    fn complete<'a>(&'a self, job: &'a Job) -> QueueFuture<'a, ()>;

    /// Mark a job as failed. Whether and when it is redelivered is up to the backend.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Ack`] if the failure is not recorded.
    fn fail<'a>(&'a self, job: &'a Job, reason: &'a str) -> QueueFuture<'a, ()>;
}
