//! # Beacon Services
//!
//! The three processes of the Beacon analytics pipeline:
//!
//! ```text
//! client ──POST /event──▶ ingestion ──XADD──▶ queue ──▶ processor ──INSERT──▶ events table
//!                                                                                 │
//! client ◀──GET /stats── reporting ◀──────────── group-by queries ───────────────┘
//! ```
//!
//! - [`ingestion`]: validates payloads and queues one job per accepted event
//! - [`processor`]: consumes jobs and inserts one row per job
//! - [`reporting`]: aggregates `page_view` rows per site and UTC day
//!
//! Every dependency is passed in as a trait object, so routers and the
//! worker run against the in-memory fakes from `beacon-testing` in tests and
//! against Redis and Postgres in the binaries.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod ingestion;
pub mod processor;
pub mod reporting;
pub mod telemetry;

pub use config::{Config, ConfigError};
pub use ingestion::IngestionState;
pub use processor::{ProcessError, Processor};
pub use reporting::ReportingState;
