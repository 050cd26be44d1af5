//! In-memory job queue for fast, deterministic pipeline tests.
//!
//! Mirrors the delivery semantics of the real backend closely enough to test
//! the processor against:
//! - jobs are handed out in batches and stay in flight until completed or failed
//! - failed jobs go back to the front of the queue (redelivery)
//! - a job that has failed `max_deliveries` times is dead-lettered
//! - [`InMemoryJobQueue::crash_consumer`] returns in-flight jobs to the queue,
//!   like a worker dying before it acknowledges

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only happens after a test already panicked

use beacon_core::queue::{EVENTS_QUEUE, PROCESS_EVENT_JOB, QueueFuture, encode_event};
use beacon_core::{EventInput, Job, JobId, JobQueue, JobSource, QueueError};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Default number of jobs per batch.
const DEFAULT_BATCH_SIZE: usize = 10;

/// Default deliveries before a failing job is dead-lettered.
const DEFAULT_MAX_DELIVERIES: u64 = 3;

/// How long an empty `next_batch` waits for new jobs.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Default)]
struct QueueState {
    next_id: u64,
    all: Vec<EventInput>,
    ready: VecDeque<Job>,
    in_flight: HashMap<JobId, Job>,
    completed: Vec<JobId>,
    failures: Vec<(JobId, String)>,
    dead_letters: Vec<(Job, String)>,
    unavailable: bool,
}

/// In-memory implementation of both [`JobQueue`] and [`JobSource`].
///
/// Clones share the same queue, so one clone can be handed to an ingestion
/// router and another to a processor.
///
/// # Example
///
/// ```
/// use beacon_core::{JobQueue, JobSource};
/// use beacon_testing::{fixtures, InMemoryJobQueue};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let queue = InMemoryJobQueue::new();
/// queue.enqueue(&fixtures::page_view("s1", "/", "u1")).await?;
///
/// let batch = queue.next_batch().await?;
/// queue.complete(&batch[0]).await?;
/// assert_eq!(queue.completed().len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryJobQueue {
    state: Arc<Mutex<QueueState>>,
    notify: Arc<Notify>,
    batch_size: usize,
    max_deliveries: u64,
    poll_interval: Duration,
}

impl InMemoryJobQueue {
    /// Create an empty, available queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            notify: Arc::new(Notify::new()),
            batch_size: DEFAULT_BATCH_SIZE,
            max_deliveries: DEFAULT_MAX_DELIVERIES,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Set the maximum batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set how many deliveries a failing job gets before it is dead-lettered.
    #[must_use]
    pub const fn with_max_deliveries(mut self, max_deliveries: u64) -> Self {
        self.max_deliveries = max_deliveries;
        self
    }

    /// Simulate the queue backend going down (or coming back).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    /// Every payload ever accepted by `enqueue`, in order.
    #[must_use]
    pub fn enqueued(&self) -> Vec<EventInput> {
        self.state.lock().unwrap().all.clone()
    }

    /// Jobs waiting to be delivered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().ready.len()
    }

    /// Whether no job is waiting to be delivered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Jobs delivered but not yet completed or failed.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.state.lock().unwrap().in_flight.len()
    }

    /// Ids of completed jobs, in completion order.
    #[must_use]
    pub fn completed(&self) -> Vec<JobId> {
        self.state.lock().unwrap().completed.clone()
    }

    /// Every recorded failure with its reason.
    #[must_use]
    pub fn failures(&self) -> Vec<(JobId, String)> {
        self.state.lock().unwrap().failures.clone()
    }

    /// Jobs that exhausted their deliveries, with the last failure reason.
    #[must_use]
    pub fn dead_letters(&self) -> Vec<(Job, String)> {
        self.state.lock().unwrap().dead_letters.clone()
    }

    /// Return every in-flight job to the queue, as if the consumer died
    /// before acknowledging.
    pub fn crash_consumer(&self) {
        let mut state = self.state.lock().unwrap();
        let mut orphaned: Vec<Job> = state.in_flight.drain().map(|(_, job)| job).collect();
        orphaned.sort_by(|a, b| a.id.cmp(&b.id));
        for job in orphaned.into_iter().rev() {
            state.ready.push_front(job);
        }
        drop(state);
        self.notify.notify_waiters();
    }

    /// Place a raw job on the queue, bypassing validation and encoding.
    ///
    /// Useful for feeding the processor payloads ingestion would never produce.
    pub fn push_raw(&self, name: &str, payload: &str) -> JobId {
        let mut state = self.state.lock().unwrap();
        let id = Self::allocate_id(&mut state);
        state.ready.push_back(Job {
            id: id.clone(),
            name: name.to_string(),
            payload: payload.to_string(),
            deliveries: 0,
        });
        drop(state);
        self.notify.notify_waiters();
        id
    }

    fn allocate_id(state: &mut QueueState) -> JobId {
        state.next_id += 1;
        JobId::new(format!("{}-0", state.next_id))
    }

    fn check_available(&self) -> Result<(), QueueError> {
        if self.state.lock().unwrap().unavailable {
            Err(QueueError::Unavailable(format!(
                "in-memory queue '{EVENTS_QUEUE}' is down"
            )))
        } else {
            Ok(())
        }
    }

    fn take_batch(&self) -> Vec<Job> {
        let mut state = self.state.lock().unwrap();
        let count = self.batch_size.min(state.ready.len());
        let mut batch = Vec::with_capacity(count);
        for mut job in state.ready.drain(..count).collect::<Vec<_>>() {
            job.deliveries += 1;
            state.in_flight.insert(job.id.clone(), job.clone());
            batch.push(job);
        }
        batch
    }

    fn ack_error(job: &Job) -> QueueError {
        QueueError::Ack {
            job_id: job.id.clone(),
            reason: "job is not in flight".to_string(),
        }
    }
}

impl Default for InMemoryJobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue for InMemoryJobQueue {
    fn enqueue(&self, event: &EventInput) -> QueueFuture<'_, JobId> {
        let event = event.clone();
        Box::pin(async move {
            self.check_available().map_err(|e| QueueError::Enqueue {
                queue: EVENTS_QUEUE.to_string(),
                reason: e.to_string(),
            })?;
            let payload = encode_event(&event)?;

            let mut state = self.state.lock().unwrap();
            let id = Self::allocate_id(&mut state);
            state.all.push(event);
            state.ready.push_back(Job {
                id: id.clone(),
                name: PROCESS_EVENT_JOB.to_string(),
                payload,
                deliveries: 0,
            });
            drop(state);

            self.notify.notify_waiters();
            Ok(id)
        })
    }

    fn ping(&self) -> QueueFuture<'_, ()> {
        Box::pin(async move { self.check_available() })
    }
}

impl JobSource for InMemoryJobQueue {
    fn next_batch(&self) -> QueueFuture<'_, Vec<Job>> {
        Box::pin(async move {
            self.check_available()?;

            let batch = self.take_batch();
            if !batch.is_empty() {
                return Ok(batch);
            }

            // Behave like a blocking read: wait for a push or the poll interval.
            let _ = tokio::time::timeout(self.poll_interval, self.notify.notified()).await;
            self.check_available()?;
            Ok(self.take_batch())
        })
    }

    fn complete<'a>(&'a self, job: &'a Job) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            self.check_available()?;
            let mut state = self.state.lock().unwrap();
            state
                .in_flight
                .remove(&job.id)
                .ok_or_else(|| Self::ack_error(job))?;
            state.completed.push(job.id.clone());
            Ok(())
        })
    }

    fn fail<'a>(&'a self, job: &'a Job, reason: &'a str) -> QueueFuture<'a, ()> {
        Box::pin(async move {
            self.check_available()?;
            let mut state = self.state.lock().unwrap();
            let job = state
                .in_flight
                .remove(&job.id)
                .ok_or_else(|| Self::ack_error(job))?;
            state.failures.push((job.id.clone(), reason.to_string()));

            if job.deliveries >= self.max_deliveries {
                state.dead_letters.push((job, reason.to_string()));
            } else {
                state.ready.push_front(job);
            }
            Ok(())
        })
    }
}
