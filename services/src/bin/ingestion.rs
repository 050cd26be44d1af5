//! Ingestion service.
//!
//! Accepts `POST /event` and places each valid event on the queue.
//!
//! # Usage
//!
//! ```bash
//! REDIS_URL=redis://127.0.0.1:6379 cargo run --bin beacon-ingestion
//! ```

use beacon_services::{Config, IngestionState, ingestion, telemetry};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    telemetry::init_tracing();

    let config = Config::from_env()?;
    telemetry::init_metrics(config.metrics_addr)?;

    let queue = config.queue.builder().build().await?;
    tracing::info!(queue = %queue.queue(), "Connected to job queue");

    let app = ingestion::router(IngestionState::new(Arc::new(queue)));

    let addr = config.ingestion_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "Ingestion service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await?;

    tracing::info!("Ingestion service stopped");
    Ok(())
}
