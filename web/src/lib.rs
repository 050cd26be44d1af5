//! Shared Axum plumbing for the Beacon HTTP services.
//!
//! Ingestion and reporting are separate processes but present the same
//! surface around their one business route:
//!
//! - [`AppError`]: every failure renders as `{"error": "<message>"}`; 5xx
//!   responses are logged with their source
//! - [`correlation_id_layer`]: request ids on spans and response headers
//! - [`handlers::health_router`]: `/health` and `/ready`
//! - [`handlers::docs_router`]: `/api-docs` and the raw OpenAPI document
//!
//! # Example
//!
//! ```ignore
//! use beacon_web::{AppError, correlation_id_layer, handlers};
//! use axum::{Router, routing::get};
//!
//! let app = Router::new()
//!     .route("/stats", get(stats))
//!     .with_state(state)
//!     .merge(handlers::health_router(readiness))
//!     .merge(handlers::docs_router("Reporting API", OPENAPI))
//!     .layer(correlation_id_layer());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;

// Re-export key types for convenience
pub use error::AppError;
pub use middleware::{CORRELATION_ID_HEADER, CorrelationId, correlation_id_layer};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
