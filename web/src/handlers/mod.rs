//! HTTP handlers shared by every Beacon service.

pub mod docs;
pub mod health;

pub use docs::docs_router;
pub use health::{DependencyCheck, Readiness, health_check, health_router};
