//! Processor worker.
//!
//! Consumes `process-event` jobs and writes one row per job. Run as many
//! instances as needed; each joins the same consumer group under its own
//! consumer name.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin beacon-processor
//! ```

use beacon_postgres::PostgresEventStore;
use beacon_services::{Config, Processor, telemetry};
use std::sync::Arc;
use tokio::sync::broadcast;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    telemetry::init_tracing();

    let config = Config::from_env()?;
    telemetry::init_metrics(config.metrics_addr)?;

    let store = PostgresEventStore::connect(&config.postgres).await?;
    store.migrate().await?;

    let queue = config.queue.builder().build().await?;
    tracing::info!(
        queue = %queue.queue(),
        consumer = %queue.consumer(),
        "Connected to job queue"
    );

    let processor = Processor::new(Arc::new(queue), Arc::new(store))
        .with_retry_delay(config.processor.retry_delay);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let worker = tokio::spawn(async move { processor.run(shutdown_rx).await });

    telemetry::shutdown_signal().await;
    let _ = shutdown_tx.send(());
    worker.await?;

    Ok(())
}
