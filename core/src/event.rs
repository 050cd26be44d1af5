//! The event payload accepted at ingestion and the record persisted by the processor.
//!
//! [`EventInput`] is what travels through the queue: the five validated
//! strings, timestamp still in its wire form. [`Event`] is what lands in the
//! store, with the timestamp resolved to an absolute instant in UTC.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Naive datetime formats accepted when the client omits an offset.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// A timestamp string that is not an ISO-8601 datetime.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid datetime: {0:?}")]
pub struct TimestampError(pub String);

/// Parse a client-supplied timestamp into an absolute instant.
///
/// Accepts RFC 3339 with any offset (normalized to UTC). A datetime without
/// an offset is interpreted as UTC, the same zone reporting uses for day
/// boundaries.
///
/// # Errors
///
/// Returns [`TimestampError`] if the string matches none of the accepted forms.
///
/// # Example
///
/// ```
/// use beacon_core::event::parse_timestamp;
///
/// let ts = parse_timestamp("2024-01-01T12:00:00+02:00").unwrap();
/// assert_eq!(ts.to_rfc3339(), "2024-01-01T10:00:00+00:00");
/// ```
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, TimestampError> {
    let trimmed = raw.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(ts.with_timezone(&Utc));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| TimestampError(raw.to_string()))
}

/// A validated ingestion payload.
///
/// This is the job payload placed on the queue. Field names match the wire
/// format exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventInput {
    /// Tenant/site the event belongs to.
    pub site_id: String,
    /// Event tag, e.g. `page_view`.
    pub event_type: String,
    /// Resource path associated with the event.
    pub path: String,
    /// Originating user or session.
    pub user_id: String,
    /// Client-supplied occurrence time, ISO-8601.
    pub timestamp: String,
}

/// A persisted event.
///
/// Immutable once stored; the store holds no dedup key, so a redelivered job
/// produces a second identical row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Tenant/site the event belongs to.
    pub site_id: String,
    /// Event tag, e.g. `page_view`.
    pub event_type: String,
    /// Resource path associated with the event.
    pub path: String,
    /// Originating user or session.
    pub user_id: String,
    /// When the event occurred (client time, not arrival time).
    pub timestamp: DateTime<Utc>,
}

impl TryFrom<EventInput> for Event {
    type Error = TimestampError;

    fn try_from(input: EventInput) -> Result<Self, Self::Error> {
        let timestamp = parse_timestamp(&input.timestamp)?;
        Ok(Self {
            site_id: input.site_id,
            event_type: input.event_type,
            path: input.path,
            user_id: input.user_id,
            timestamp,
        })
    }
}
