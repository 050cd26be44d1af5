//! Processor worker: turn queued jobs into stored events.
//!
//! The worker pulls batches from a [`JobSource`], maps each job to an
//! [`Event`] and inserts it. Success completes the job; any failure marks it
//! failed and leaves redelivery to the queue backend. The worker never
//! retries a job itself, and a redelivered job that had already been
//! inserted produces a second row.

use beacon_core::event::TimestampError;
use beacon_core::queue::PROCESS_EVENT_JOB;
use beacon_core::{Event, EventInput, EventStore, Job, JobSource, QueueError, StoreError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

/// Why a job could not be turned into a stored event.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The job is not a `process-event` job
    #[error("unexpected job name {0:?}")]
    UnexpectedJob(String),

    /// The payload is not an event
    #[error("undecodable payload: {0}")]
    Decode(#[source] QueueError),

    /// The payload carries an unparseable timestamp
    #[error("invalid event: {0}")]
    InvalidEvent(#[from] TimestampError),

    /// The insert failed
    #[error("insert failed: {0}")]
    Store(#[from] StoreError),
}

/// The consumption loop.
#[derive(Clone)]
pub struct Processor {
    source: Arc<dyn JobSource>,
    store: Arc<dyn EventStore>,
    retry_delay: Duration,
}

impl Processor {
    /// Create a processor reading from `source` and writing to `store`.
    #[must_use]
    pub fn new(source: Arc<dyn JobSource>, store: Arc<dyn EventStore>) -> Self {
        Self {
            source,
            store,
            retry_delay: Duration::from_secs(5),
        }
    }

    /// Set the pause after `next_batch` itself fails.
    #[must_use]
    pub const fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Map one job to an event and insert it.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError`] if the job is not an event or the insert fails.
    pub async fn handle_job(&self, job: &Job) -> Result<Event, ProcessError> {
        if job.name != PROCESS_EVENT_JOB {
            return Err(ProcessError::UnexpectedJob(job.name.clone()));
        }

        let input: EventInput = job.decode().map_err(ProcessError::Decode)?;
        let event = Event::try_from(input)?;
        self.store.insert_event(&event).await?;

        Ok(event)
    }

    /// Handle one job and report the outcome to the source.
    async fn process(&self, job: &Job) {
        match self.handle_job(job).await {
            Ok(event) => {
                tracing::info!(
                    job_id = %job.id,
                    deliveries = job.deliveries,
                    "Processed event for site {}",
                    event.site_id
                );
                metrics::counter!("processor_jobs_completed_total").increment(1);

                if let Err(e) = self.source.complete(job).await {
                    // The row is stored; the job will come back and insert a duplicate.
                    tracing::warn!(job_id = %job.id, error = %e, "Failed to complete job");
                }
            }
            Err(e) => {
                tracing::error!(
                    job_id = %job.id,
                    deliveries = job.deliveries,
                    error = %e,
                    "Job {} failed",
                    job.id
                );
                metrics::counter!("processor_jobs_failed_total").increment(1);

                if let Err(fail_err) = self.source.fail(job, &e.to_string()).await {
                    tracing::warn!(
                        job_id = %job.id,
                        error = %fail_err,
                        "Failed to mark job as failed"
                    );
                }
            }
        }
    }

    /// Pull one batch and process every job in it.
    ///
    /// Returns the number of jobs handled, successful or not.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the batch could not be read.
    pub async fn run_once(&self) -> Result<usize, QueueError> {
        let batch = self.source.next_batch().await?;
        self.process_batch(&batch).await;
        Ok(batch.len())
    }

    async fn process_batch(&self, batch: &[Job]) {
        for job in batch {
            self.process(job).await;
        }
    }

    /// Consume until `shutdown` fires.
    ///
    /// Shutdown is observed while waiting for a batch. A batch already read
    /// is processed to the end first, so no insert is cut off before its ack.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!("Processor started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                batch = self.source.next_batch() => match batch {
                    Ok(jobs) => self.process_batch(&jobs).await,
                    Err(e) => {
                        let retry_in_ms =
                            u64::try_from(self.retry_delay.as_millis()).unwrap_or(u64::MAX);
                        tracing::error!(
                            error = %e,
                            retry_in_ms,
                            "Failed to read jobs"
                        );
                        tokio::select! {
                            _ = shutdown.recv() => break,
                            () = tokio::time::sleep(self.retry_delay) => {}
                        }
                    }
                },
            }
        }

        tracing::info!("Processor stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use beacon_core::JobQueue;
    use beacon_testing::{InMemoryEventStore, InMemoryJobQueue, fixtures};

    fn processor(queue: &InMemoryJobQueue, store: &InMemoryEventStore) -> Processor {
        Processor::new(Arc::new(queue.clone()), Arc::new(store.clone()))
            .with_retry_delay(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn job_becomes_one_row() {
        let queue = InMemoryJobQueue::new();
        let store = InMemoryEventStore::new();
        let input = fixtures::page_view_at("s1", "/home", "u1", "2024-01-01T12:00:00+02:00");
        queue.enqueue(&input).await.unwrap();

        let handled = processor(&queue, &store).run_once().await.unwrap();

        assert_eq!(handled, 1);
        assert_eq!(queue.completed().len(), 1);
        let rows = store.events();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].site_id, "s1");
        assert_eq!(rows[0].path, "/home");
        assert_eq!(rows[0].user_id, "u1");
        assert_eq!(rows[0].timestamp.to_rfc3339(), "2024-01-01T10:00:00+00:00");
    }

    #[tokio::test]
    async fn insert_failure_fails_the_job() {
        let queue = InMemoryJobQueue::new();
        let store = InMemoryEventStore::new();
        store.set_insert_failure(true);
        let id = queue.enqueue(&fixtures::page_view("s1", "/", "u1")).await.unwrap();

        processor(&queue, &store).run_once().await.unwrap();

        let failures = queue.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, id);
        assert!(failures[0].1.starts_with("insert failed"));
        assert!(queue.completed().is_empty());
        assert_eq!(queue.len(), 1, "failed job goes back for redelivery");
    }

    #[tokio::test]
    async fn redelivery_after_recovery_stores_the_event() {
        let queue = InMemoryJobQueue::new();
        let store = InMemoryEventStore::new();
        let worker = processor(&queue, &store);
        queue.enqueue(&fixtures::page_view("s1", "/", "u1")).await.unwrap();

        store.set_insert_failure(true);
        worker.run_once().await.unwrap();
        store.set_insert_failure(false);
        worker.run_once().await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(queue.completed().len(), 1);
    }

    #[tokio::test]
    async fn crash_before_ack_duplicates_the_row() {
        let queue = InMemoryJobQueue::new();
        let store = InMemoryEventStore::new();
        let worker = processor(&queue, &store);
        queue.enqueue(&fixtures::page_view("s1", "/", "u1")).await.unwrap();

        // Insert succeeds but the worker dies before completing the job
        let batch = queue.next_batch().await.unwrap();
        worker.handle_job(&batch[0]).await.unwrap();
        queue.crash_consumer();

        worker.run_once().await.unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(queue.completed().len(), 1);
    }

    #[tokio::test]
    async fn unexpected_jobs_are_failed_not_stored() {
        let queue = InMemoryJobQueue::new().with_max_deliveries(1);
        let store = InMemoryEventStore::new();
        queue.push_raw("send-email", "{}");
        queue.push_raw(PROCESS_EVENT_JOB, "{\"site_id\": 7}");
        queue.push_raw(
            PROCESS_EVENT_JOB,
            r#"{"site_id":"s1","event_type":"page_view","path":"/","user_id":"u","timestamp":"soon"}"#,
        );

        processor(&queue, &store).run_once().await.unwrap();

        assert!(store.is_empty());
        let reasons: Vec<String> = queue.dead_letters().into_iter().map(|(_, r)| r).collect();
        assert_eq!(reasons.len(), 3);
        assert!(reasons[0].starts_with("unexpected job name"));
        assert!(reasons[1].starts_with("undecodable payload"));
        assert!(reasons[2].starts_with("invalid event"));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let queue = InMemoryJobQueue::new();
        let store = InMemoryEventStore::new();
        let worker = processor(&queue, &store);
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move { worker.run(rx).await });
        queue.enqueue(&fixtures::page_view("s1", "/", "u1")).await.unwrap();

        for _ in 0..100 {
            if store.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("processor did not stop")
            .unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn shutdown_never_splits_a_batch() {
        let queue = InMemoryJobQueue::new();
        let store = InMemoryEventStore::new();
        let worker = processor(&queue, &store);
        for user in ["u1", "u2", "u3"] {
            queue.enqueue(&fixtures::page_view("s1", "/", user)).await.unwrap();
        }
        let (tx, rx) = broadcast::channel(1);
        tx.send(()).unwrap();

        worker.run(rx).await;

        assert!(store.is_empty() || store.len() == 3, "rows: {}", store.len());
        assert_eq!(queue.completed().len(), store.len());
        assert_eq!(queue.in_flight(), 0);
    }

    #[tokio::test]
    async fn queue_outage_is_retried() {
        let queue = InMemoryJobQueue::new();
        let store = InMemoryEventStore::new();
        let worker = processor(&queue, &store);
        queue.set_unavailable(true);
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run(rx).await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        queue.set_unavailable(false);
        queue.enqueue(&fixtures::page_view("s1", "/", "u1")).await.unwrap();

        for _ in 0..100 {
            if store.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(store.len(), 1);
    }
}
