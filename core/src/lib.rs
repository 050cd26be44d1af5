//! # Beacon Core
//!
//! Shared schema, contracts and traits for the Beacon analytics pipeline.
//!
//! The pipeline is three processes glued together by a durable job queue and
//! a relational store:
//!
//! ```text
//! client ──► ingestion ──► queue ──► processor ──► store ◄── reporting ◄── client
//!           (validate)              (persist)               (aggregate)
//! ```
//!
//! This crate holds everything those processes agree on:
//!
//! - [`event`]: the wire payload ([`EventInput`]) and the persisted record ([`Event`])
//! - [`validation`]: the schema check applied at ingestion
//! - [`queue`]: the job contract plus the [`JobQueue`] / [`JobSource`] traits
//! - [`store`]: the [`EventStore`] trait used by the processor and reporting
//! - [`stats`]: report queries, the UTC day window and the [`Summary`] shape
//!
//! Backends live in their own crates (`beacon-postgres`, `beacon-redis`) and
//! in-memory fakes live in `beacon-testing`, so every handler can be tested
//! without a network.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod event;
pub mod queue;
pub mod stats;
pub mod store;
pub mod validation;

// Re-export commonly used types
pub use chrono::{DateTime, NaiveDate, Utc};
pub use event::{Event, EventInput};
pub use queue::{Job, JobId, JobQueue, JobSource, QueueError};
pub use stats::{DayWindow, PathViews, StatsQuery, Summary};
pub use store::{EventStore, StoreError};
pub use validation::{ValidationError, validate_payload};
